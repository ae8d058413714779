use crate::tools::ToolName;

/// Specification for a tool, including metadata
#[derive(Clone)]
pub struct ToolSpec {
    /// Unique name of the tool
    pub name: ToolName,
    /// Detailed description of what the tool does
    pub description: &'static str,
    /// JSON Schema for the tool's parameters
    pub parameters_schema: serde_json::Value,
}

impl ToolSpec {
    /// The definition advertised to the model
    pub fn to_definition(&self) -> llm::ToolDefinition {
        llm::ToolDefinition {
            name: self.name.as_str().to_string(),
            description: self.description.to_string(),
            parameters: self.parameters_schema.clone(),
        }
    }
}
