//! LLM integration crate providing the provider abstraction used by the studio
//!
//! This crate implements:
//! - Common interface for LLM interactions via the LLMProvider trait
//! - A streaming Google Gemini client
//! - Message streaming capabilities
//! - Recording and playback of raw provider streams for debugging and testing


mod utils;

pub mod gemini;
pub mod recording;
pub mod streaming;
pub mod types;

pub use gemini::GeminiClient;
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Structure to represent different types of streaming content from LLMs
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingChunk {
    /// Regular text content
    Text(String),
    /// Content identified as "thinking" (supported by some models)
    Thinking(String),
    /// JSON input for tool calls with optional metadata
    InputJson {
        content: String,
        tool_name: Option<String>,
        tool_id: Option<String>,
    },
    /// Rate limit notification with countdown in seconds
    RateLimit { seconds_remaining: u64 },
    /// Clear rate limit notification
    RateLimitClear,
    /// The provider finished streaming this response
    StreamingComplete,
}

pub type StreamingCallback = Box<dyn Fn(&StreamingChunk) -> Result<()> + Send + Sync>;

/// Trait for different LLM provider implementations
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Sends a request to the LLM service
    async fn send_message(
        &mut self,
        request: LLMRequest,
        streaming_callback: Option<&StreamingCallback>,
    ) -> Result<LLMResponse>;
}
