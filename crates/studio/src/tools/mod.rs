//! Tools the model may call, and the results attached to assistant messages

pub mod core;
pub mod impls;

pub use self::core::{DynTool, Tool, ToolRegistry, ToolSpec};
pub use impls::{CodeAnalysisReport, Complexity, StockQuote, WeatherReport};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Failed to parse tool parameters: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolName {
    GetWeather,
    GetStockPrice,
    AnalyzeCode,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetWeather => "getWeather",
            ToolName::GetStockPrice => "getStockPrice",
            ToolName::AnalyzeCode => "analyzeCode",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "getWeather" => Ok(ToolName::GetWeather),
            "getStockPrice" => Ok(ToolName::GetStockPrice),
            "analyzeCode" => Ok(ToolName::AnalyzeCode),
            _ => Err(ToolError::UnknownTool(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolState {
    Pending,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPayload {
    Weather(WeatherReport),
    Stock(StockQuote),
    CodeAnalysis(CodeAnalysisReport),
}

impl ToolPayload {
    /// Interpret a tool's JSON output according to the tool that produced it
    pub fn from_json(tool_name: ToolName, value: serde_json::Value) -> Result<Self, ToolError> {
        let parse_error = |e: serde_json::Error| {
            ToolError::ParseError(format!("Invalid {tool_name} result: {e}"))
        };
        Ok(match tool_name {
            ToolName::GetWeather => Self::Weather(serde_json::from_value(value).map_err(parse_error)?),
            ToolName::GetStockPrice => Self::Stock(serde_json::from_value(value).map_err(parse_error)?),
            ToolName::AnalyzeCode => {
                Self::CodeAnalysis(serde_json::from_value(value).map_err(parse_error)?)
            }
        })
    }
}

/// A tool call attached to an assistant message
///
/// Created `Pending` when the call is dispatched and moved to `Result` once
/// its output arrives. It never moves back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: ToolName,
    pub state: ToolState,
    pub payload: Option<ToolPayload>,
}

impl ToolResult {
    pub fn pending(call_id: impl Into<String>, tool_name: ToolName) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name,
            state: ToolState::Pending,
            payload: None,
        }
    }

    pub fn completed(call_id: impl Into<String>, payload: ToolPayload) -> Self {
        let tool_name = match &payload {
            ToolPayload::Weather(_) => ToolName::GetWeather,
            ToolPayload::Stock(_) => ToolName::GetStockPrice,
            ToolPayload::CodeAnalysis(_) => ToolName::AnalyzeCode,
        };
        Self {
            call_id: call_id.into(),
            tool_name,
            state: ToolState::Result,
            payload: Some(payload),
        }
    }
}
