//! Structured widgets embedded in assistant text
//!
//! Assistant replies carry a handful of marker grammars next to ordinary prose:
//! self-closing component tags (`<ProcessFlow steps={[...]} />`, `<Quiz .../>`),
//! `$$...$$` math blocks, fenced code blocks with metadata attributes and
//! `<thinking>...</thinking>` sections. The extractor turns each recognized
//! marker into an [`Annotation`] and returns the remaining display text.

mod extractor;


pub use extractor::{extract, extract_streaming};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The marker grammars known to the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationKind {
    ProcessFlow,
    Quiz,
    Math,
    CodeBlock,
    Thinking,
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnnotationKind::ProcessFlow => "process flow",
            AnnotationKind::Quiz => "quiz",
            AnnotationKind::Math => "math block",
            AnnotationKind::CodeBlock => "code block",
            AnnotationKind::Thinking => "thinking block",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Annotation {
    ProcessFlow(ProcessFlow),
    Quiz(Quiz),
    Math(MathBlock),
    CodeBlock(CodeBlock),
    Thinking(ThinkingBlock),
}

impl Annotation {
    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::ProcessFlow(_) => AnnotationKind::ProcessFlow,
            Annotation::Quiz(_) => AnnotationKind::Quiz,
            Annotation::Math(_) => AnnotationKind::Math,
            Annotation::CodeBlock(_) => AnnotationKind::CodeBlock,
            Annotation::Thinking(_) => AnnotationKind::Thinking,
        }
    }

    /// Serialize the annotation back into the marker text it was parsed from.
    ///
    /// Extracting the returned text yields an equal annotation.
    pub fn to_markup(&self) -> String {
        match self {
            Annotation::ProcessFlow(flow) => format!(
                "<ProcessFlow steps={{{}}} />",
                serde_json::to_string(&flow.steps).unwrap_or_else(|_| "[]".to_string())
            ),
            Annotation::Quiz(quiz) => format!(
                "<Quiz title=\"{}\" questions={{{}}} />",
                quiz.title,
                serde_json::to_string(&quiz.questions).unwrap_or_else(|_| "[]".to_string())
            ),
            Annotation::Math(math) => format!("$${}$$", math.expression),
            Annotation::CodeBlock(block) => {
                let mut header = block.language.clone();
                for (key, value) in [
                    ("project", &block.project),
                    ("file", &block.file),
                    ("type", &block.block_type),
                    ("title", &block.title),
                ] {
                    if let Some(value) = value {
                        header.push_str(&format!(" {key}=\"{value}\""));
                    }
                }
                format!("```{}\n{}\n```", header, block.code)
            }
            Annotation::Thinking(thinking) => {
                format!("<thinking>{}</thinking>", thinking.content)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFlow {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Active,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
}

/// Field names on the wire follow what the model is prompted to emit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "question")]
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(rename = "correctAnswer")]
    pub correct_answer_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathBlock {
    /// Raw text between the delimiters, never evaluated
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub language: String,
    pub project: Option<String>,
    pub file: Option<String>,
    #[serde(rename = "type")]
    pub block_type: Option<String>,
    pub title: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub content: String,
}

/// A marker that looked like one of ours but could not be parsed.
///
/// The marker text stays in the residual text verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseWarning {
    pub marker: AnnotationKind,
    /// Byte offset of the marker in the scanned text
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}: {}", self.marker, self.offset, self.message)
    }
}

/// An opener whose closing delimiter has not been seen yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMarker {
    pub kind: AnnotationKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extraction {
    pub annotations: Vec<Annotation>,
    /// Input text with every extracted span removed
    pub residual: String,
    pub warnings: Vec<ParseWarning>,
    /// First unterminated marker, if any
    pub pending: Option<PendingMarker>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
