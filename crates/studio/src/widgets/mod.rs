//! Terminal renderers for annotations and tool results

mod blocks;
mod cards;
mod math;

pub use blocks::{CodeBlockWidget, MathWidget, ProcessFlowWidget, QuizWidget, ThinkingWidget};
pub use cards::{pending_text, CodeAnalysisWidget, StockWidget, WeatherWidget};
pub use math::render_math;

use crate::annotations::{Annotation, AnnotationKind};
use crate::conversation::Message;
use crate::tools::{ToolName, ToolResult};
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    Annotation(AnnotationKind),
    Tool(ToolName),
}

/// Something a widget can render
#[derive(Debug, Clone, Copy)]
pub enum Widget<'a> {
    Annotation(&'a Annotation),
    Tool(&'a ToolResult),
}

impl Widget<'_> {
    pub fn kind(&self) -> WidgetKind {
        match self {
            Widget::Annotation(annotation) => WidgetKind::Annotation(annotation.kind()),
            Widget::Tool(result) => WidgetKind::Tool(result.tool_name),
        }
    }
}

pub trait WidgetRenderer: Send + Sync {
    /// Lines to print for `widget`. Renderers only receive widgets of the kind they are registered for.
    fn render(&self, widget: Widget<'_>) -> Vec<String>;
}

pub struct WidgetRegistry {
    renderers: HashMap<WidgetKind, Box<dyn WidgetRenderer>>,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::with_default_widgets()
    }
}

impl WidgetRegistry {
    pub fn empty() -> Self {
        Self {
            renderers: HashMap::new(),
        }
    }

    pub fn with_default_widgets() -> Self {
        let mut registry = Self::empty();
        registry.register(
            WidgetKind::Annotation(AnnotationKind::ProcessFlow),
            Box::new(ProcessFlowWidget),
        );
        registry.register(
            WidgetKind::Annotation(AnnotationKind::Quiz),
            Box::new(QuizWidget),
        );
        registry.register(
            WidgetKind::Annotation(AnnotationKind::Math),
            Box::new(MathWidget),
        );
        registry.register(
            WidgetKind::Annotation(AnnotationKind::CodeBlock),
            Box::new(CodeBlockWidget),
        );
        registry.register(
            WidgetKind::Annotation(AnnotationKind::Thinking),
            Box::new(ThinkingWidget),
        );
        registry.register(WidgetKind::Tool(ToolName::GetWeather), Box::new(WeatherWidget));
        registry.register(WidgetKind::Tool(ToolName::GetStockPrice), Box::new(StockWidget));
        registry.register(
            WidgetKind::Tool(ToolName::AnalyzeCode),
            Box::new(CodeAnalysisWidget),
        );
        registry
    }

    pub fn register(&mut self, kind: WidgetKind, renderer: Box<dyn WidgetRenderer>) {
        self.renderers.insert(kind, renderer);
    }

    /// Render one widget; `None` if nothing is registered for its kind
    pub fn render(&self, widget: Widget<'_>) -> Option<Vec<String>> {
        let kind = widget.kind();
        let Some(renderer) = self.renderers.get(&kind) else {
            trace!("No widget registered for {:?}", kind);
            return None;
        };
        Some(renderer.render(widget))
    }

    /// Display text, then annotation widgets, then tool widgets, separated by blank lines
    pub fn render_message(&self, message: &Message) -> Vec<String> {
        let mut sections: Vec<Vec<String>> = Vec::new();

        let text = message.display_text.trim_end();
        if !text.trim().is_empty() {
            sections.push(text.lines().map(str::to_string).collect());
        }
        for annotation in &message.annotations {
            sections.extend(self.render(Widget::Annotation(annotation)));
        }
        for result in &message.tool_results {
            sections.extend(self.render(Widget::Tool(result)));
        }

        let mut lines = Vec::new();
        for (i, section) in sections.into_iter().filter(|s| !s.is_empty()).enumerate() {
            if i > 0 {
                lines.push(String::new());
            }
            lines.extend(section);
        }
        lines
    }
}
