//! Chunk sources for provider streams
//!
//! Providers parse server-sent events from a `ChunkStream`, which is either a
//! live HTTP response or a recorded session played back with (or without) its
//! original timing. Both go through identical parsing code.

use crate::recording::RecordedChunk;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Response;
use std::time::{Duration, Instant};

#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Live HTTP response body
pub struct HttpChunkStream {
    response: Response,
}

impl HttpChunkStream {
    pub fn new(response: Response) -> Self {
        Self { response }
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.response.chunk().await {
            Ok(Some(chunk)) => Ok(Some(chunk.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("HTTP chunk error: {}", e)),
        }
    }
}

/// Recorded SSE data lines, re-emitted as `data: ...` lines
pub struct PlaybackChunkStream {
    chunks: Vec<RecordedChunk>,
    current_index: usize,
    start_time: Instant,
    fast_mode: bool,
}

impl PlaybackChunkStream {
    pub fn new(chunks: Vec<RecordedChunk>, fast_mode: bool) -> Self {
        Self {
            chunks,
            current_index: 0,
            start_time: Instant::now(),
            fast_mode,
        }
    }
}

#[async_trait]
impl ChunkStream for PlaybackChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(chunk) = self.chunks.get(self.current_index) else {
            return Ok(None);
        };

        if self.fast_mode {
            // ~60fps so streaming still looks like streaming
            tokio::time::sleep(Duration::from_millis(17)).await;
        } else {
            let expected = Duration::from_millis(chunk.timestamp_ms);
            let elapsed = self.start_time.elapsed();
            if elapsed < expected {
                tokio::time::sleep(expected - elapsed).await;
            }
        }

        let sse_line = format!("data: {}\n", chunk.data);
        self.current_index += 1;
        Ok(Some(sse_line.into_bytes()))
    }
}
