use super::spec::ToolSpec;
use super::tool::Tool;
use crate::tools::ToolError;
use anyhow::Result;
use serde_json::Value;

/// Type-erased tool interface for storing heterogeneous tools in collections
#[async_trait::async_trait]
pub trait DynTool: Send + Sync + 'static {
    /// Get the static metadata for this tool
    fn spec(&self) -> ToolSpec;

    /// Invoke the tool with JSON parameters and get its JSON output
    async fn invoke(&self, params: Value) -> Result<Value>;
}

/// Automatic implementation of DynTool for any type that implements Tool
#[async_trait::async_trait]
impl<T: Tool> DynTool for T {
    fn spec(&self) -> ToolSpec {
        Tool::spec(self)
    }

    async fn invoke(&self, params: Value) -> Result<Value> {
        let input: T::Input = serde_json::from_value(params).map_err(|e| {
            // Convert Serde error to ToolError::ParseError
            ToolError::ParseError(format!("Failed to parse parameters: {e}"))
        })?;

        let output = self.execute(input).await?;

        serde_json::to_value(output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))
    }
}
