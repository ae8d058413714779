//! Builds one assistant message from stream events
//!
//! Every text delta re-runs the extractor over the whole buffer, since a
//! marker's closing delimiter may arrive in any later delta. The store is
//! updated after each event; the message is frozen once the stream ends or
//! fails.

use crate::annotations::{self, Annotation, Extraction, ThinkingBlock};
use crate::conversation::{ConversationStore, MessageStatus, MessageUpdate, StoreError, StreamFailure};
use crate::tools::{ToolName, ToolPayload, ToolResult, ToolState};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Empty,
    Accumulating,
    Finalizing,
    Complete,
    Failed,
}

pub struct StreamAssembler {
    message_id: String,
    state: AssemblerState,
    buffer: String,
    thinking: String,
    tool_results: Vec<ToolResult>,
}

impl StreamAssembler {
    /// Assemble into the streaming message `message_id`, which must already be in the store
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            state: AssemblerState::Empty,
            buffer: String::new(),
            thinking: String::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Raw text received so far
    pub fn content(&self) -> &str {
        &self.buffer
    }

    pub fn push_text(&mut self, store: &mut ConversationStore, delta: &str) -> Result<(), StoreError> {
        self.accept_event()?;
        self.buffer.push_str(delta);
        self.publish_streaming(store)
    }

    /// Native thinking output; shown as a leading thinking block, never part of the content
    pub fn push_thinking(
        &mut self,
        store: &mut ConversationStore,
        delta: &str,
    ) -> Result<(), StoreError> {
        self.accept_event()?;
        self.thinking.push_str(delta);
        self.publish_streaming(store)
    }

    pub fn tool_call_started(
        &mut self,
        store: &mut ConversationStore,
        call_id: &str,
        tool_name: &str,
    ) -> Result<(), StoreError> {
        self.accept_event()?;
        let Some(tool_name) = known_tool(tool_name) else {
            return Ok(());
        };
        if self.tool_results.iter().any(|r| r.call_id == call_id) {
            warn!("Ignoring repeated start of tool call {}", call_id);
            return Ok(());
        }

        self.tool_results.push(ToolResult::pending(call_id, tool_name));
        self.publish_streaming(store)
    }

    pub fn tool_call_result(
        &mut self,
        store: &mut ConversationStore,
        call_id: &str,
        tool_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.accept_event()?;
        let Some(tool_name) = known_tool(tool_name) else {
            return Ok(());
        };
        let payload = match ToolPayload::from_json(tool_name, payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping result of tool call {}: {}", call_id, e);
                return Ok(());
            }
        };

        match self.tool_results.iter_mut().find(|r| r.call_id == call_id) {
            Some(existing) if existing.state == ToolState::Result => {
                warn!("Ignoring second result for tool call {}", call_id);
                return Ok(());
            }
            Some(existing) => {
                existing.state = ToolState::Result;
                existing.payload = Some(payload);
            }
            None => {
                debug!("Result for tool call {} arrived without a start", call_id);
                self.tool_results.push(ToolResult::completed(call_id, payload));
            }
        }
        self.publish_streaming(store)
    }

    /// Run the final extraction and freeze the message as complete
    pub fn finish(&mut self, store: &mut ConversationStore) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.state = AssemblerState::Finalizing;

        let extraction = annotations::extract(&self.buffer);
        for warning in &extraction.warnings {
            warn!("Message {}: kept malformed {}", self.message_id, warning);
        }
        self.drop_pending_tools();

        self.freeze(store, extraction, MessageStatus::Complete, AssemblerState::Complete)
    }

    /// Freeze whatever arrived so far and mark the message as failed
    pub fn fail(
        &mut self,
        store: &mut ConversationStore,
        failure: StreamFailure,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        warn!("Message {} failed: {}", self.message_id, failure);

        let extraction = annotations::extract(&self.buffer);
        self.drop_pending_tools();

        self.freeze(
            store,
            extraction,
            MessageStatus::Failed(failure),
            AssemblerState::Failed,
        )
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        match self.state {
            AssemblerState::Complete | AssemblerState::Failed => {
                Err(StoreError::Immutable(self.message_id.clone()))
            }
            _ => Ok(()),
        }
    }

    fn accept_event(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.state == AssemblerState::Empty {
            self.state = AssemblerState::Accumulating;
        }
        Ok(())
    }

    fn drop_pending_tools(&mut self) {
        self.tool_results.retain(|result| {
            let done = result.state == ToolState::Result;
            if !done {
                warn!(
                    "Tool call {} ({}) never produced a result",
                    result.call_id, result.tool_name
                );
            }
            done
        });
    }

    fn publish_streaming(&mut self, store: &mut ConversationStore) -> Result<(), StoreError> {
        let extraction = annotations::extract_streaming(&self.buffer);
        if let Some(pending) = extraction.pending {
            debug!(
                "Holding back {} at byte {} of message {}",
                pending.kind, pending.offset, self.message_id
            );
        }
        let update = self.update(extraction, MessageStatus::Streaming);
        if let Err(e) = store.replace_in_flight(&self.message_id, update) {
            self.state = AssemblerState::Failed;
            return Err(e);
        }
        Ok(())
    }

    fn freeze(
        &mut self,
        store: &mut ConversationStore,
        extraction: Extraction,
        status: MessageStatus,
        final_state: AssemblerState,
    ) -> Result<(), StoreError> {
        let update = self.update(extraction, status);
        match store.replace_in_flight(&self.message_id, update) {
            Ok(_) => {
                self.state = final_state;
                Ok(())
            }
            Err(e) => {
                self.state = AssemblerState::Failed;
                Err(e)
            }
        }
    }

    fn update(&self, extraction: Extraction, status: MessageStatus) -> MessageUpdate {
        let mut annotations = Vec::with_capacity(extraction.annotations.len() + 1);
        let thinking = self.thinking.trim();
        if !thinking.is_empty() {
            annotations.push(Annotation::Thinking(ThinkingBlock {
                content: thinking.to_string(),
            }));
        }
        annotations.extend(extraction.annotations);

        MessageUpdate {
            content: self.buffer.clone(),
            display_text: extraction.residual,
            annotations,
            tool_results: self.tool_results.clone(),
            status,
        }
    }
}

fn known_tool(name: &str) -> Option<ToolName> {
    match name.parse::<ToolName>() {
        Ok(tool_name) => Some(tool_name),
        Err(_) => {
            warn!("Ignoring event for unknown tool `{}`", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::MathBlock;
    use crate::conversation::Message;
    use crate::test_utils::chunk_str;
    use serde_json::json;

    fn store_with_stream(id: &str) -> ConversationStore {
        let mut store = ConversationStore::new();
        store.append(Message::user("u", "question")).unwrap();
        store.append(Message::assistant_streaming(id)).unwrap();
        store
    }

    fn weather_json() -> serde_json::Value {
        json!({"location": "Rome", "temperature": 25, "condition": "sunny", "humidity": 40, "windSpeed": 5})
    }

    #[test]
    fn test_annotation_appears_only_after_closing_delimiter() {
        let input = "Check $$\\pi r^2$$ area";
        let close_end = input.rfind("$$").unwrap() + 2;

        for chunk_size in 1..=5 {
            let mut store = store_with_stream("a");
            let mut assembler = StreamAssembler::new("a");
            let mut received = 0;

            for chunk in chunk_str(input, chunk_size) {
                received += chunk.len();
                assembler.push_text(&mut store, &chunk).unwrap();
                let message = store.get("a").unwrap();
                let expected = if received >= close_end { 1 } else { 0 };
                assert_eq!(message.annotations.len(), expected, "after {received} bytes");
                assert!(!message.display_text.contains('$'));
                assert_eq!(message.status, MessageStatus::Streaming);
            }

            assembler.finish(&mut store).unwrap();
            let message = store.get("a").unwrap();
            assert_eq!(assembler.state(), AssemblerState::Complete);
            assert_eq!(message.status, MessageStatus::Complete);
            assert_eq!(message.content, input);
            assert_eq!(message.display_text, "Check  area");
            assert_eq!(
                message.annotations,
                vec![Annotation::Math(MathBlock {
                    expression: "\\pi r^2".to_string()
                })]
            );
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");
        assert_eq!(assembler.state(), AssemblerState::Empty);

        assembler.push_text(&mut store, "Hi").unwrap();
        assert_eq!(assembler.state(), AssemblerState::Accumulating);

        assembler.finish(&mut store).unwrap();
        assert_eq!(assembler.state(), AssemblerState::Complete);

        // Nothing changes after completion
        assert_eq!(
            assembler.push_text(&mut store, " there").unwrap_err(),
            StoreError::Immutable("a".to_string())
        );
        assert!(assembler.finish(&mut store).is_err());
        assert!(assembler.fail(&mut store, StreamFailure::Cancelled).is_err());
        assert_eq!(store.get("a").unwrap().content, "Hi");
    }

    #[test]
    fn test_empty_stream_completes() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");
        assembler.finish(&mut store).unwrap();

        let message = store.get("a").unwrap();
        assert_eq!(message.status, MessageStatus::Complete);
        assert_eq!(message.content, "");
    }

    #[test]
    fn test_failure_freezes_partial_content() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");

        for delta in ["Partial ", "answer with $$x", "^2"] {
            assembler.push_text(&mut store, delta).unwrap();
        }
        assembler
            .fail(&mut store, StreamFailure::Transport("reset".to_string()))
            .unwrap();

        let message = store.get("a").unwrap();
        assert_eq!(message.content, "Partial answer with $$x^2");
        assert_eq!(
            message.status,
            MessageStatus::Failed(StreamFailure::Transport("reset".to_string()))
        );
        // The unterminated marker is shown as text once frozen
        assert_eq!(message.display_text, "Partial answer with $$x^2");
        assert!(message.annotations.is_empty());
        assert_eq!(assembler.state(), AssemblerState::Failed);

        assert!(assembler.push_text(&mut store, "more").is_err());
        assert_eq!(store.get("a").unwrap().content, "Partial answer with $$x^2");
    }

    #[test]
    fn test_tool_call_lifecycle() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");

        assembler.tool_call_started(&mut store, "call-1", "getWeather").unwrap();
        let message = store.get("a").unwrap();
        assert_eq!(message.tool_results.len(), 1);
        assert_eq!(message.tool_results[0].state, ToolState::Pending);
        assert_eq!(message.tool_results[0].payload, None);

        assembler
            .tool_call_result(&mut store, "call-1", "getWeather", weather_json())
            .unwrap();
        let message = store.get("a").unwrap();
        assert_eq!(message.tool_results[0].state, ToolState::Result);
        assert!(matches!(
            message.tool_results[0].payload,
            Some(ToolPayload::Weather(ref report)) if report.location == "Rome"
        ));

        // A second result never replaces the first
        assembler
            .tool_call_result(
                &mut store,
                "call-1",
                "getWeather",
                json!({"location": "Paris", "temperature": 1, "condition": "rainy", "humidity": 1, "windSpeed": 1}),
            )
            .unwrap();
        assert!(matches!(
            store.get("a").unwrap().tool_results[0].payload,
            Some(ToolPayload::Weather(ref report)) if report.location == "Rome"
        ));

        assembler.push_text(&mut store, "It is sunny in Rome.").unwrap();
        assembler.finish(&mut store).unwrap();
        let message = store.get("a").unwrap();
        assert_eq!(message.tool_results.len(), 1);
        assert_eq!(message.content, "It is sunny in Rome.");
    }

    #[test]
    fn test_unknown_tools_are_ignored() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");

        assembler.tool_call_started(&mut store, "call-1", "getHoroscope").unwrap();
        assembler
            .tool_call_result(&mut store, "call-1", "getHoroscope", json!({"sign": "leo"}))
            .unwrap();
        assert!(store.get("a").unwrap().tool_results.is_empty());
    }

    #[test]
    fn test_result_without_start_and_pending_tools_dropped() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");

        assembler
            .tool_call_result(
                &mut store,
                "call-1",
                "getStockPrice",
                json!({"symbol": "AAPL", "price": 190.0, "change": -1.5, "volume": 1000}),
            )
            .unwrap();
        assembler.tool_call_started(&mut store, "call-2", "analyzeCode").unwrap();
        assert_eq!(store.get("a").unwrap().tool_results.len(), 2);

        assembler.finish(&mut store).unwrap();
        let results = &store.get("a").unwrap().tool_results;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "call-1");
        assert_eq!(results[0].tool_name, ToolName::GetStockPrice);
        assert_eq!(results[0].state, ToolState::Result);
    }

    #[test]
    fn test_invalid_tool_payload_stays_pending() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");

        assembler.tool_call_started(&mut store, "call-1", "getWeather").unwrap();
        assembler
            .tool_call_result(&mut store, "call-1", "getWeather", json!("not a report"))
            .unwrap();
        assert_eq!(
            store.get("a").unwrap().tool_results[0].state,
            ToolState::Pending
        );
    }

    #[test]
    fn test_thinking_leads_annotations_without_touching_content() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");

        assembler.push_thinking(&mut store, "Let me ").unwrap();
        assembler.push_thinking(&mut store, "think.").unwrap();
        assembler.push_text(&mut store, "Result: $$x$$").unwrap();
        assembler.finish(&mut store).unwrap();

        let message = store.get("a").unwrap();
        assert_eq!(message.content, "Result: $$x$$");
        assert_eq!(message.display_text, "Result: ");
        assert_eq!(
            message.annotations,
            vec![
                Annotation::Thinking(ThinkingBlock {
                    content: "Let me think.".to_string()
                }),
                Annotation::Math(MathBlock {
                    expression: "x".to_string()
                }),
            ]
        );
    }

    #[test]
    fn test_malformed_marker_survives_finalization() {
        let mut store = store_with_stream("a");
        let mut assembler = StreamAssembler::new("a");
        let text = "Steps: <ProcessFlow steps={[oops]} />";

        for chunk in chunk_str(text, 4) {
            assembler.push_text(&mut store, &chunk).unwrap();
        }
        assembler.finish(&mut store).unwrap();

        let message = store.get("a").unwrap();
        assert!(message.annotations.is_empty());
        assert_eq!(message.display_text, text);
    }

    #[test]
    fn test_missing_message_fails_assembler() {
        let mut store = ConversationStore::new();
        let mut assembler = StreamAssembler::new("nope");
        assert_eq!(
            assembler.push_text(&mut store, "x").unwrap_err(),
            StoreError::NotFound("nope".to_string())
        );
        assert_eq!(assembler.state(), AssemblerState::Failed);
    }
}
