//! In-memory conversation: ordered messages plus change notifications

use crate::annotations::Annotation;
use crate::tools::ToolResult;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Why a streamed message stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum StreamFailure {
    #[error("Cancelled by user")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No response for {0} seconds")]
    Timeout(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MessageStatus {
    Streaming,
    Complete,
    Failed(StreamFailure),
}

impl MessageStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Raw text as received, markers included
    pub content: String,
    /// Text shown to the user, extracted markers removed
    pub display_text: String,
    pub annotations: Vec<Annotation>,
    pub tool_results: Vec<ToolResult>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            role: Role::User,
            display_text: text.clone(),
            content: text,
            annotations: Vec::new(),
            tool_results: Vec::new(),
            status: MessageStatus::Complete,
            created_at: Utc::now(),
        }
    }

    /// Empty assistant message about to receive a stream
    pub fn assistant_streaming(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            display_text: String::new(),
            annotations: Vec::new(),
            tool_results: Vec::new(),
            status: MessageStatus::Streaming,
            created_at: Utc::now(),
        }
    }
}

/// New state for the in-flight message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageUpdate {
    pub content: String,
    pub display_text: String,
    pub annotations: Vec<Annotation>,
    pub tool_results: Vec<ToolResult>,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    Appended(Message),
    Updated(Message),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("No message with id {0}")]
    NotFound(String),

    #[error("Message {0} is already finalized")]
    Immutable(String),

    #[error("Invalid conversation state: {0}")]
    InvalidState(String),
}

/// Owns every message of the conversation
///
/// Messages are only appended at the tail. The one exception is the streaming
/// assistant message at the tail, which is replaced until it is finalized.
#[derive(Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    subscribers: Vec<async_channel::Sender<ConversationEvent>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) -> Result<(), StoreError> {
        if self.messages.iter().any(|m| m.id == message.id) {
            return Err(StoreError::InvalidState(format!(
                "duplicate message id {}",
                message.id
            )));
        }
        if let Some(tail) = self.messages.last() {
            if !tail.status.is_final() {
                return Err(StoreError::InvalidState(format!(
                    "message {} is still streaming",
                    tail.id
                )));
            }
            if tail.role == message.role {
                return Err(StoreError::InvalidState(format!(
                    "two {:?} messages in a row",
                    message.role
                )));
            }
        }

        trace!("Appending message {}", message.id);
        self.messages.push(message.clone());
        self.publish(ConversationEvent::Appended(message));
        Ok(())
    }

    /// Replace the state of the streaming message `id`. Content may only grow.
    pub fn replace_in_flight(
        &mut self,
        id: &str,
        update: MessageUpdate,
    ) -> Result<&Message, StoreError> {
        let index = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let message = &mut self.messages[index];
        if message.status.is_final() {
            return Err(StoreError::Immutable(id.to_string()));
        }
        if !update.content.starts_with(&message.content) {
            return Err(StoreError::InvalidState(format!(
                "content of message {id} may only be appended to"
            )));
        }

        message.content = update.content;
        message.display_text = update.display_text;
        message.annotations = update.annotations;
        message.tool_results = update.tool_results;
        message.status = update.status;

        let snapshot = message.clone();
        self.publish(ConversationEvent::Updated(snapshot));
        Ok(&self.messages[index])
    }

    /// Snapshot of all messages in insertion order
    pub fn all(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Receive an event for every append and every in-flight update
    pub fn subscribe(&mut self) -> async_channel::Receiver<ConversationEvent> {
        let (sender, receiver) = async_channel::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn publish(&mut self, event: ConversationEvent) {
        // Dropped receivers close their channel
        self.subscribers
            .retain(|sender| sender.try_send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(content: &str, status: MessageStatus) -> MessageUpdate {
        MessageUpdate {
            content: content.to_string(),
            display_text: content.to_string(),
            annotations: Vec::new(),
            tool_results: Vec::new(),
            status,
        }
    }

    #[test]
    fn test_append_keeps_insertion_order() {
        let mut store = ConversationStore::new();
        store.append(Message::user("1", "hi")).unwrap();
        store.append(Message::assistant_streaming("2")).unwrap();
        store
            .replace_in_flight("2", update("hello", MessageStatus::Complete))
            .unwrap();
        store.append(Message::user("3", "again")).unwrap();

        let ids: Vec<String> = store.all().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_alternation_is_enforced() {
        let mut store = ConversationStore::new();
        store.append(Message::user("1", "hi")).unwrap();
        let error = store.append(Message::user("2", "hi again")).unwrap_err();
        assert!(matches!(error, StoreError::InvalidState(_)));
        assert_eq!(store.messages().len(), 1);
    }

    #[test]
    fn test_no_append_while_streaming() {
        let mut store = ConversationStore::new();
        store.append(Message::assistant_streaming("1")).unwrap();
        let error = store.append(Message::user("2", "hi")).unwrap_err();
        assert!(matches!(error, StoreError::InvalidState(_)));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut store = ConversationStore::new();
        store.append(Message::user("1", "hi")).unwrap();
        store.append(Message::assistant_streaming("1")).unwrap_err();
    }

    #[test]
    fn test_replace_in_flight_errors() {
        let mut store = ConversationStore::new();
        store.append(Message::user("1", "hi")).unwrap();
        store.append(Message::assistant_streaming("2")).unwrap();

        assert_eq!(
            store
                .replace_in_flight("missing", update("x", MessageStatus::Streaming))
                .unwrap_err(),
            StoreError::NotFound("missing".to_string())
        );
        assert_eq!(
            store
                .replace_in_flight("1", update("hi!", MessageStatus::Streaming))
                .unwrap_err(),
            StoreError::Immutable("1".to_string())
        );

        store
            .replace_in_flight("2", update("partial", MessageStatus::Streaming))
            .unwrap();
        assert!(matches!(
            store.replace_in_flight("2", update("other", MessageStatus::Streaming)),
            Err(StoreError::InvalidState(_))
        ));

        store
            .replace_in_flight(
                "2",
                update("partial", MessageStatus::Failed(StreamFailure::Cancelled)),
            )
            .unwrap();
        assert_eq!(
            store
                .replace_in_flight("2", update("partial more", MessageStatus::Streaming))
                .unwrap_err(),
            StoreError::Immutable("2".to_string())
        );
        assert_eq!(store.get("2").unwrap().content, "partial");
    }

    #[tokio::test]
    async fn test_subscribers_see_every_change() {
        let mut store = ConversationStore::new();
        let events = store.subscribe();
        let dropped = store.subscribe();
        drop(dropped);

        store.append(Message::user("1", "hi")).unwrap();
        store.append(Message::assistant_streaming("2")).unwrap();
        store
            .replace_in_flight("2", update("ok", MessageStatus::Complete))
            .unwrap();

        assert!(matches!(events.recv().await.unwrap(), ConversationEvent::Appended(m) if m.id == "1"));
        assert!(matches!(events.recv().await.unwrap(), ConversationEvent::Appended(m) if m.id == "2"));
        match events.recv().await.unwrap() {
            ConversationEvent::Updated(message) => {
                assert_eq!(message.content, "ok");
                assert_eq!(message.status, MessageStatus::Complete);
            }
            other => panic!("Unexpected event {other:?}"),
        }
        assert!(events.is_empty());
        assert_eq!(store.subscribers.len(), 1);
    }
}
