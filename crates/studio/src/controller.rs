//! Runs chat turns: user input in, one streamed assistant message out

use crate::assembler::StreamAssembler;
use crate::collaborator::{ChatRequest, LlmCollaborator, StreamEvent};
use crate::conversation::{
    ConversationStore, Message, MessageStatus, Role, StoreError, StreamFailure,
};
use crate::preview::{collect_preview_files, PreviewSink};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("A response is still streaming")]
    Busy,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to one in-flight assistant message
pub struct StreamHandle {
    message_id: String,
    cancel: CancellationToken,
    task: JoinHandle<MessageStatus>,
}

impl StreamHandle {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Wait for the stream to end and return the final message status
    pub async fn wait(self) -> Result<MessageStatus> {
        Ok(self.task.await?)
    }
}

pub struct ChatController {
    store: Arc<Mutex<ConversationStore>>,
    collaborator: Arc<dyn LlmCollaborator>,
    system_prompt: String,
    idle_timeout: Option<Duration>,
    preview: Option<Arc<dyn PreviewSink>>,
    in_flight: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl ChatController {
    pub fn new(collaborator: Arc<dyn LlmCollaborator>, system_prompt: impl Into<String>) -> Self {
        Self {
            store: Arc::new(Mutex::new(ConversationStore::new())),
            collaborator,
            system_prompt: system_prompt.into(),
            idle_timeout: None,
            preview: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Fail a stream that sends nothing for this long
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_preview(mut self, sink: Arc<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        self.store.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Append the user message and start streaming the reply
    pub async fn send(&self, text: &str) -> Result<StreamHandle, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ChatError::Busy);
        }
        let guard = InFlightGuard(self.in_flight.clone());

        let user_id = self.next_message_id();
        let assistant_id = self.next_message_id();
        let history = {
            let mut store = self.store.lock();
            store.append(Message::user(&user_id, text))?;
            let history = request_history(store.messages());
            store.append(Message::assistant_streaming(&assistant_id))?;
            history
        };
        debug!("Starting assistant message {}", assistant_id);

        let request = ChatRequest {
            system_prompt: self.system_prompt.clone(),
            history,
        };
        let cancel = CancellationToken::new();
        let turn = Turn {
            store: self.store.clone(),
            collaborator: self.collaborator.clone(),
            idle_timeout: self.idle_timeout,
            preview: self.preview.clone(),
            cancel: cancel.clone(),
            assembler: StreamAssembler::new(assistant_id.clone()),
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            turn.run(request).await
        });

        Ok(StreamHandle {
            message_id: assistant_id,
            cancel,
            task,
        })
    }

    /// Stop the stream behind `handle`. Does nothing once the stream has ended.
    pub fn cancel(&self, handle: &StreamHandle) {
        if !handle.cancel.is_cancelled() {
            info!("Cancelling message {}", handle.message_id);
            handle.cancel.cancel();
        }
    }

    fn next_message_id(&self) -> String {
        format!("msg-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Conversation as sent to the model. Assistant turns that produced no text are skipped.
fn request_history(messages: &[Message]) -> Vec<llm::Message> {
    messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| match m.role {
            Role::User => llm::Message::user_text(&m.content),
            Role::Assistant => llm::Message::assistant_text(&m.content),
        })
        .collect()
}

enum Next {
    Event(StreamEvent),
    Stop(StreamFailure),
}

struct Turn {
    store: Arc<Mutex<ConversationStore>>,
    collaborator: Arc<dyn LlmCollaborator>,
    idle_timeout: Option<Duration>,
    preview: Option<Arc<dyn PreviewSink>>,
    cancel: CancellationToken,
    assembler: StreamAssembler,
}

impl Turn {
    async fn run(mut self, request: ChatRequest) -> MessageStatus {
        let mut events = match self
            .collaborator
            .open_stream(request, self.cancel.clone())
            .await
        {
            Ok(events) => events,
            Err(e) => {
                error!("Failed to open stream: {:#}", e);
                return self.fail(StreamFailure::Transport(e.to_string()));
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Next::Stop(StreamFailure::Cancelled),
                next = next_event(&mut events, self.idle_timeout) => next,
            };

            let event = match next {
                Next::Event(event) => event,
                Next::Stop(failure) => return self.fail(failure),
            };

            let mut store = self.store.lock();
            let applied = match event {
                StreamEvent::TextDelta(text) => self.assembler.push_text(&mut store, &text),
                StreamEvent::ThinkingDelta(text) => {
                    self.assembler.push_thinking(&mut store, &text)
                }
                StreamEvent::ToolCallStarted { call_id, tool_name } => {
                    self.assembler
                        .tool_call_started(&mut store, &call_id, &tool_name)
                }
                StreamEvent::ToolCallResult {
                    call_id,
                    tool_name,
                    payload,
                } => self
                    .assembler
                    .tool_call_result(&mut store, &call_id, &tool_name, payload),
                StreamEvent::StreamEnd => {
                    let finished = self.assembler.finish(&mut store);
                    drop(store);
                    return match finished {
                        Ok(()) => {
                            self.publish_preview();
                            MessageStatus::Complete
                        }
                        Err(e) => {
                            error!("Failed to finalize message: {}", e);
                            self.final_status()
                        }
                    };
                }
                StreamEvent::StreamError(reason) => {
                    drop(store);
                    warn!("Stream error: {}", reason);
                    return self.fail(StreamFailure::Transport(reason));
                }
            };

            if let Err(e) = applied {
                error!("Stopping stream for {}: {}", self.assembler.message_id(), e);
                drop(store);
                self.cancel.cancel();
                return self.final_status();
            }
        }
    }

    fn fail(&mut self, failure: StreamFailure) -> MessageStatus {
        // Tell the collaborator to stop sending
        self.cancel.cancel();
        let mut store = self.store.lock();
        if let Err(e) = self.assembler.fail(&mut store, failure.clone()) {
            error!("Failed to mark message as failed: {}", e);
        }
        drop(store);
        self.final_status()
    }

    fn final_status(&self) -> MessageStatus {
        self.store
            .lock()
            .get(self.assembler.message_id())
            .map(|m| m.status.clone())
            .unwrap_or(MessageStatus::Failed(StreamFailure::Transport(
                "message missing from conversation".to_string(),
            )))
    }

    fn publish_preview(&self) {
        let Some(sink) = &self.preview else {
            return;
        };
        let files = collect_preview_files(self.store.lock().messages());
        if files.is_empty() {
            return;
        }
        if let Err(e) = sink.publish(&files) {
            warn!("Failed to publish preview: {:#}", e);
        }
    }
}

async fn next_event(
    events: &mut mpsc::UnboundedReceiver<StreamEvent>,
    idle_timeout: Option<Duration>,
) -> Next {
    let received = match idle_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, events.recv()).await {
            Ok(received) => received,
            Err(_) => return Next::Stop(StreamFailure::Timeout(timeout.as_secs())),
        },
        None => events.recv().await,
    };
    match received {
        Some(event) => Next::Event(event),
        None => Next::Stop(StreamFailure::Transport(
            "stream closed without an end marker".to_string(),
        )),
    }
}
