use crate::collaborator::{ChatRequest, LlmCollaborator, StreamEvent};
use crate::preview::PreviewSink;
use anyhow::Result;
use async_trait::async_trait;
use llm::{
    ContentBlock, LLMProvider, LLMRequest, LLMResponse, StreamingCallback, StreamingChunk, Usage,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Split `text` into chunks of `chunk_size` characters
pub fn chunk_str(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// One canned provider response and the chunks streamed before it
pub struct ScriptedTurn {
    pub chunks: Vec<StreamingChunk>,
    pub response: LLMResponse,
}

/// LLMProvider returning canned turns in order
pub struct ScriptedProvider {
    turns: VecDeque<Result<ScriptedTurn>>,
    requests: Arc<Mutex<Vec<LLMRequest>>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Result<ScriptedTurn>>) -> Self {
        Self {
            turns: turns.into(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<LLMRequest>>> {
        self.requests.clone()
    }

    pub fn text_turn(chunks: &[&str]) -> Result<ScriptedTurn> {
        Ok(ScriptedTurn {
            chunks: chunks
                .iter()
                .map(|c| StreamingChunk::Text(c.to_string()))
                .collect(),
            response: LLMResponse {
                content: vec![ContentBlock::new_text(chunks.concat())],
                usage: Usage::zero(),
            },
        })
    }

    pub fn tool_turn(
        text: &str,
        call_id: &str,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<ScriptedTurn> {
        let mut chunks = Vec::new();
        let mut content = Vec::new();
        if !text.is_empty() {
            chunks.push(StreamingChunk::Text(text.to_string()));
            content.push(ContentBlock::new_text(text));
        }
        chunks.push(StreamingChunk::InputJson {
            content: input.to_string(),
            tool_name: Some(tool_name.to_string()),
            tool_id: Some(call_id.to_string()),
        });
        content.push(ContentBlock::new_tool_use(call_id, tool_name, input));

        Ok(ScriptedTurn {
            chunks,
            response: LLMResponse {
                content,
                usage: Usage::zero(),
            },
        })
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn send_message(
        &mut self,
        request: LLMRequest,
        streaming_callback: Option<&StreamingCallback>,
    ) -> Result<LLMResponse> {
        self.requests.lock().push(request);
        let turn = self
            .turns
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("No more scripted turns")))?;

        if let Some(callback) = streaming_callback {
            for chunk in &turn.chunks {
                callback(chunk)?;
            }
            callback(&StreamingChunk::StreamingComplete)?;
        }
        Ok(turn.response)
    }
}

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Event(StreamEvent),
    Sleep(Duration),
    /// Keep the stream open without sending anything until cancelled
    Hang,
}

/// Collaborator that plays back scripted steps, one script per turn
#[derive(Clone, Default)]
pub struct ScriptedCollaborator {
    scripts: Arc<Mutex<VecDeque<Vec<ScriptStep>>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedCollaborator {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Text deltas followed by `StreamEnd`
    pub fn text_script(deltas: &[&str]) -> Vec<ScriptStep> {
        deltas
            .iter()
            .map(|d| ScriptStep::Event(StreamEvent::TextDelta(d.to_string())))
            .chain(std::iter::once(ScriptStep::Event(StreamEvent::StreamEnd)))
            .collect()
    }
}

#[async_trait]
impl LlmCollaborator for ScriptedCollaborator {
    async fn open_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        self.requests.lock().push(request);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("No more scripts"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for step in script {
                if cancel.is_cancelled() {
                    return;
                }
                match step {
                    ScriptStep::Event(event) => {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                    ScriptStep::Sleep(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Preview sink remembering every published file set
#[derive(Clone, Default)]
pub struct CapturingPreview {
    pub published: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
}

impl PreviewSink for CapturingPreview {
    fn publish(&self, files: &BTreeMap<String, String>) -> Result<()> {
        self.published.lock().push(files.clone());
        Ok(())
    }
}

#[test]
fn test_chunk_str_respects_char_boundaries() {
    assert_eq!(chunk_str("añb", 2), vec!["añ", "b"]);
    assert_eq!(chunk_str("", 3), Vec::<String>::new());
    assert_eq!(chunk_str("abc", 0), vec!["a", "b", "c"]);
}
