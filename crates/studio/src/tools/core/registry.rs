use std::collections::HashMap;

use crate::tools::core::dyn_tool::DynTool;
use crate::tools::{ToolError, ToolName};
use anyhow::Result;
use serde_json::Value;
use tracing::debug;

/// Registry of the tools offered to the model
pub struct ToolRegistry {
    tools: HashMap<ToolName, Box<dyn DynTool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding the weather, stock and code analysis tools
    pub fn with_default_tools() -> Self {
        use crate::tools::impls::{AnalyzeCodeTool, GetStockPriceTool, GetWeatherTool};

        let mut registry = Self::new();
        registry.register(Box::new(GetWeatherTool));
        registry.register(Box::new(GetStockPriceTool));
        registry.register(Box::new(AnalyzeCodeTool));
        registry
    }

    /// Register a tool in the registry
    pub fn register(&mut self, tool: Box<dyn DynTool>) {
        self.tools.insert(tool.spec().name, tool);
    }

    /// Get a tool by its wire name
    pub fn get(&self, name: &str) -> Option<&dyn DynTool> {
        let name = name.parse::<ToolName>().ok()?;
        self.tools.get(&name).map(|tool| tool.as_ref())
    }

    /// Tool definitions for the model, ordered by name
    pub fn definitions(&self) -> Vec<llm::ToolDefinition> {
        let mut definitions: Vec<_> = self
            .tools
            .values()
            .map(|tool| tool.spec().to_definition())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Look up a tool by name and run it
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        debug!("Invoking tool {} with {}", name, params);
        tool.invoke(params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definitions_cover_default_tools() {
        let registry = ToolRegistry::with_default_tools();
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|definition| definition.name)
            .collect();
        assert_eq!(names, vec!["analyzeCode", "getStockPrice", "getWeather"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_rejected() {
        let registry = ToolRegistry::with_default_tools();
        let error = registry
            .invoke("getHoroscope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ToolError>(),
            Some(ToolError::UnknownTool(name)) if name == "getHoroscope"
        ));
    }

    #[tokio::test]
    async fn test_bad_parameters_are_a_parse_error() {
        let registry = ToolRegistry::with_default_tools();
        let error = registry
            .invoke("getWeather", json!({"city": "Paris"}))
            .await
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ToolError>(),
            Some(ToolError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_invoke_returns_tool_output() {
        let registry = ToolRegistry::with_default_tools();
        let output = registry
            .invoke("getStockPrice", json!({"symbol": "aapl"}))
            .await
            .unwrap();
        assert_eq!(output["symbol"], "AAPL");
    }
}
