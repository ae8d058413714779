use super::spec::ToolSpec;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Core trait for tools, defining the execution interface
#[async_trait::async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Input type for this tool, must be deserializable from JSON
    type Input: DeserializeOwned + Send;

    /// Output type for this tool, sent back to the model and shown as a card
    type Output: Serialize + Send + Sync;

    /// Get the metadata for this tool
    fn spec(&self) -> ToolSpec;

    /// Execute the tool with the given input
    async fn execute(&self, input: Self::Input) -> Result<Self::Output>;
}
