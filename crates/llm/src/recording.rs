use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// One recorded provider response: the request that produced it and the raw SSE data lines
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecordingSession {
    pub request: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub chunks: Vec<RecordedChunk>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecordedChunk {
    /// Content of the `data:` part of the SSE line
    pub data: String,
    /// Milliseconds since the request was sent
    pub timestamp_ms: u64,
}

struct ActiveRecording {
    session: RecordingSession,
    started: Instant,
}

/// Appends recorded sessions to a JSON array file
pub struct APIRecorder {
    file_path: PathBuf,
    current: Mutex<Option<ActiveRecording>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("recording state lock poisoned"))
}

impl APIRecorder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file_path: path.as_ref().to_path_buf(),
            current: Mutex::new(None),
        }
    }

    pub fn start_recording(&self, request: serde_json::Value) -> Result<()> {
        *lock(&self.current)? = Some(ActiveRecording {
            session: RecordingSession {
                request,
                timestamp: chrono::Utc::now(),
                chunks: Vec::new(),
            },
            started: Instant::now(),
        });
        Ok(())
    }

    pub fn record_chunk(&self, data: &str) -> Result<()> {
        if let Some(active) = lock(&self.current)?.as_mut() {
            let timestamp_ms = active.started.elapsed().as_millis() as u64;
            active.session.chunks.push(RecordedChunk {
                data: data.to_string(),
                timestamp_ms,
            });
        }
        Ok(())
    }

    /// Finish the current session and append it to the recording file
    pub fn end_recording(&self) -> Result<()> {
        let Some(active) = lock(&self.current)?.take() else {
            return Ok(());
        };

        let mut sessions: Vec<RecordingSession> = if self.file_path.exists() {
            let contents = std::fs::read_to_string(&self.file_path)
                .context("Failed to read recording file")?;
            if contents.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&contents).context("Failed to parse recording file")?
            }
        } else {
            Vec::new()
        };
        sessions.push(active.session);

        let json = serde_json::to_string_pretty(&sessions)?;
        std::fs::write(&self.file_path, json).context("Failed to write recording file")?;
        Ok(())
    }
}

/// Sequential access to the sessions of a recording file, shared between clones
#[derive(Clone)]
pub struct PlaybackState {
    sessions: Arc<Vec<RecordingSession>>,
    index: Arc<Mutex<usize>>,
    pub fast: bool,
}

impl PlaybackState {
    pub fn from_file<P: AsRef<Path>>(path: P, fast: bool) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).context("Failed to read recording file")?;
        let sessions: Vec<RecordingSession> =
            serde_json::from_str(&contents).context("Failed to parse recording file")?;
        Ok(Self {
            sessions: Arc::new(sessions),
            index: Arc::new(Mutex::new(0)),
            fast,
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Take the next session, or None if exhausted
    pub fn next_session(&self) -> Result<Option<RecordingSession>> {
        let mut idx = lock(&self.index)?;
        let session = self.sessions.get(*idx).cloned();
        if session.is_some() {
            *idx += 1;
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recorder_appends_sessions_and_playback_sequences_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");

        let recorder = APIRecorder::new(&path);
        recorder.start_recording(json!({"first": 1})).unwrap();
        recorder.record_chunk("{\"a\":1}").unwrap();
        recorder.end_recording().unwrap();

        recorder.start_recording(json!({"second": 2})).unwrap();
        recorder.record_chunk("{\"b\":2}").unwrap();
        recorder.record_chunk("{\"c\":3}").unwrap();
        recorder.end_recording().unwrap();

        let state = PlaybackState::from_file(&path, true).unwrap();
        assert_eq!(state.session_count(), 2);

        let s1 = state.next_session().unwrap().unwrap();
        assert_eq!(s1.request["first"], 1);
        assert_eq!(s1.chunks.len(), 1);
        assert_eq!(s1.chunks[0].data, "{\"a\":1}");

        let s2 = state.next_session().unwrap().unwrap();
        assert_eq!(s2.request["second"], 2);
        assert_eq!(s2.chunks.len(), 2);

        assert!(state.next_session().unwrap().is_none());
    }

    #[test]
    fn end_without_start_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recording.json");
        APIRecorder::new(&path).end_recording().unwrap();
        assert!(!path.exists());
    }
}
