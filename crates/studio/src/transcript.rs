//! Prints a streaming assistant message to a terminal

use crate::conversation::{Message, MessageStatus};
use crate::tools::ToolState;
use crate::widgets::{pending_text, WidgetRegistry};
use std::collections::HashSet;
use std::io::{self, Write};
use tracing::debug;

/// Text is written as it grows; widgets are written once the message is final
pub struct TranscriptPrinter<'a, W: Write> {
    registry: &'a WidgetRegistry,
    out: W,
    printed: String,
    announced_tools: HashSet<String>,
    at_line_start: bool,
}

impl<'a, W: Write> TranscriptPrinter<'a, W> {
    pub fn new(registry: &'a WidgetRegistry, out: W) -> Self {
        Self {
            registry,
            out,
            printed: String::new(),
            announced_tools: HashSet::new(),
            at_line_start: true,
        }
    }

    pub fn update(&mut self, message: &Message) -> io::Result<()> {
        self.write_new_text(&message.display_text)?;

        for result in &message.tool_results {
            if result.state == ToolState::Pending && self.announced_tools.insert(result.call_id.clone())
            {
                self.start_line()?;
                writeln!(self.out, "[{}]", pending_text(result.tool_name))?;
            }
        }
        self.out.flush()
    }

    pub fn finish(&mut self, message: &Message) -> io::Result<()> {
        self.write_new_text(&message.display_text)?;
        self.start_line()?;

        let widgets_only = Message {
            display_text: String::new(),
            ..message.clone()
        };
        let lines = self.registry.render_message(&widgets_only);
        if !lines.is_empty() {
            writeln!(self.out)?;
            for line in lines {
                writeln!(self.out, "{line}")?;
            }
        }

        if let MessageStatus::Failed(failure) = &message.status {
            writeln!(self.out, "[stopped: {failure}]")?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_new_text(&mut self, display_text: &str) -> io::Result<()> {
        match display_text.strip_prefix(self.printed.as_str()) {
            Some("") => {}
            Some(suffix) => {
                write!(self.out, "{suffix}")?;
                self.at_line_start = suffix.ends_with('\n');
            }
            None => debug!("Display text was rewritten, not reprinting"),
        }
        self.printed = display_text.to_string();
        Ok(())
    }

    fn start_line(&mut self) -> io::Result<()> {
        if !self.at_line_start {
            writeln!(self.out)?;
            self.at_line_start = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{Annotation, MathBlock};
    use crate::conversation::StreamFailure;
    use crate::tools::{ToolName, ToolResult};

    fn streaming(display_text: &str) -> Message {
        let mut message = Message::assistant_streaming("a");
        message.display_text = display_text.to_string();
        message
    }

    #[test]
    fn test_prints_growing_text_then_widgets() {
        let registry = WidgetRegistry::with_default_widgets();
        let mut printer = TranscriptPrinter::new(&registry, Vec::new());

        printer.update(&streaming("Check ")).unwrap();
        printer.update(&streaming("Check ")).unwrap();
        printer.update(&streaming("Check  area")).unwrap();

        let mut done = streaming("Check  area");
        done.status = MessageStatus::Complete;
        done.annotations = vec![Annotation::Math(MathBlock {
            expression: r"\pi r^2".to_string(),
        })];
        printer.finish(&done).unwrap();

        let output = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(output, "Check  area\n\n  π r²\n");
    }

    #[test]
    fn test_pending_tools_announced_once() {
        let registry = WidgetRegistry::with_default_widgets();
        let mut printer = TranscriptPrinter::new(&registry, Vec::new());

        let mut message = streaming("Let me check");
        message.tool_results = vec![ToolResult::pending("c1", ToolName::GetStockPrice)];
        printer.update(&message).unwrap();
        printer.update(&message).unwrap();

        let output = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(output, "Let me check\n[Fetching stock information...]\n");
    }

    #[test]
    fn test_failure_is_reported() {
        let registry = WidgetRegistry::with_default_widgets();
        let mut printer = TranscriptPrinter::new(&registry, Vec::new());

        printer.update(&streaming("Partial")).unwrap();
        let mut failed = streaming("Partial");
        failed.status = MessageStatus::Failed(StreamFailure::Cancelled);
        printer.finish(&failed).unwrap();

        let output = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(output, "Partial\n[stopped: Cancelled by user]\n");
    }
}
