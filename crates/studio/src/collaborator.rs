//! The LLM side of a chat turn, reduced to an ordered stream of events
//!
//! The controller only sees [`StreamEvent`]s. [`ProviderCollaborator`] produces
//! them from an [`LLMProvider`] and runs the tool round trips in between.

use crate::tools::ToolRegistry;
use anyhow::Result;
use async_trait::async_trait;
use llm::{
    ContentBlock, LLMProvider, LLMRequest, Message, MessageContent, MessageRole, StreamingCallback,
    StreamingChunk, StreamingError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    ToolCallStarted {
        call_id: String,
        tool_name: String,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        payload: serde_json::Value,
    },
    StreamEnd,
    StreamError(String),
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    /// Prior turns followed by the new user message
    pub history: Vec<Message>,
}

#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    /// Start one assistant turn.
    ///
    /// The returned channel ends with `StreamEnd` or `StreamError`. Once
    /// `cancel` fires the collaborator stops sending and drops its sender.
    async fn open_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>>;
}

/// Streams from an [`LLMProvider`] and executes requested tools via the registry
pub struct ProviderCollaborator {
    provider: Arc<tokio::sync::Mutex<Box<dyn LLMProvider>>>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
    next_request_id: Arc<AtomicU64>,
}

impl ProviderCollaborator {
    pub fn new(provider: Box<dyn LLMProvider>, tools: ToolRegistry, max_steps: usize) -> Self {
        Self {
            provider: Arc::new(tokio::sync::Mutex::new(provider)),
            tools: Arc::new(tools),
            max_steps: max_steps.max(1),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

#[async_trait]
impl LlmCollaborator for ProviderCollaborator {
    async fn open_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let turn = ToolLoop {
            provider: self.provider.clone(),
            tools: self.tools.clone(),
            max_steps: self.max_steps,
            next_request_id: self.next_request_id.clone(),
            tx,
            cancel,
        };
        tokio::spawn(turn.run(request));
        Ok(rx)
    }
}

struct ToolLoop {
    provider: Arc<tokio::sync::Mutex<Box<dyn LLMProvider>>>,
    tools: Arc<ToolRegistry>,
    max_steps: usize,
    next_request_id: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
}

impl ToolLoop {
    async fn run(self, request: ChatRequest) {
        let mut messages = request.history;

        for step in 1..=self.max_steps {
            if self.cancel.is_cancelled() {
                return;
            }

            let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
            let llm_request = LLMRequest {
                messages: messages.clone(),
                system_prompt: request.system_prompt.clone(),
                tools: Some(self.tools.definitions()),
                request_id,
            };
            debug!("Tool loop step {} (request {})", step, request_id);

            let callback = self.streaming_callback();
            let result = {
                let mut provider = self.provider.lock().await;
                provider.send_message(llm_request, Some(&callback)).await
            };

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    if self.cancel.is_cancelled() || is_user_cancelled(&e) {
                        debug!("Request {} stopped after cancellation", request_id);
                    } else {
                        self.emit(StreamEvent::StreamError(e.to_string()));
                    }
                    return;
                }
            };

            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .tool_uses()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            if tool_uses.is_empty() {
                self.emit(StreamEvent::StreamEnd);
                return;
            }

            messages.push(Message {
                role: MessageRole::Assistant,
                content: MessageContent::Structured(response.content),
            });

            let mut results = Vec::with_capacity(tool_uses.len());
            for (call_id, tool_name, input) in tool_uses {
                if self.cancel.is_cancelled() {
                    return;
                }
                self.emit(StreamEvent::ToolCallStarted {
                    call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                });

                let (content, is_error) = match self.tools.invoke(&tool_name, input).await {
                    Ok(output) => {
                        self.emit(StreamEvent::ToolCallResult {
                            call_id: call_id.clone(),
                            tool_name: tool_name.clone(),
                            payload: output.clone(),
                        });
                        (output, None)
                    }
                    Err(e) => {
                        warn!("Tool call {} ({}) failed: {}", call_id, tool_name, e);
                        (serde_json::Value::String(e.to_string()), Some(true))
                    }
                };
                results.push(ContentBlock::ToolResult {
                    tool_use_id: call_id,
                    tool_name,
                    content,
                    is_error,
                });
            }

            messages.push(Message {
                role: MessageRole::User,
                content: MessageContent::Structured(results),
            });
        }

        warn!(
            "Model still requested tools after {} steps, ending turn",
            self.max_steps
        );
        self.emit(StreamEvent::StreamEnd);
    }

    fn streaming_callback(&self) -> StreamingCallback {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        Box::new(move |chunk: &StreamingChunk| {
            if cancel.is_cancelled() {
                return Err(anyhow::Error::from(StreamingError::UserCancelled));
            }
            let event = match chunk {
                StreamingChunk::Text(text) => StreamEvent::TextDelta(text.clone()),
                StreamingChunk::Thinking(text) => StreamEvent::ThinkingDelta(text.clone()),
                StreamingChunk::RateLimit { seconds_remaining } => {
                    debug!("Rate limited, retrying in {}s", seconds_remaining);
                    return Ok(());
                }
                // Tool calls are announced once the response is complete
                StreamingChunk::InputJson { .. }
                | StreamingChunk::RateLimitClear
                | StreamingChunk::StreamingComplete => return Ok(()),
            };
            tx.send(event)
                .map_err(|_| anyhow::Error::from(StreamingError::UserCancelled))
        })
    }

    fn emit(&self, event: StreamEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

fn is_user_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<StreamingError>(),
        Some(StreamingError::UserCancelled)
    )
}
