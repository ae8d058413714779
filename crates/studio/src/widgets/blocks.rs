use super::math::render_math;
use super::{Widget, WidgetRenderer};
use crate::annotations::{Annotation, StepStatus};

pub struct ProcessFlowWidget;

impl WidgetRenderer for ProcessFlowWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Widget::Annotation(Annotation::ProcessFlow(flow)) = widget else {
            return Vec::new();
        };
        let mut lines = vec!["Process:".to_string()];
        for (index, step) in flow.steps.iter().enumerate() {
            let icon = match step.status {
                StepStatus::Completed => '✓',
                StepStatus::Active => '▶',
                StepStatus::Pending => '○',
            };
            lines.push(format!("  {} {}. {}", icon, index + 1, step.title));
            if !step.description.is_empty() {
                lines.push(format!("       {}", step.description));
            }
        }
        lines
    }
}

pub struct QuizWidget;

impl WidgetRenderer for QuizWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Widget::Annotation(Annotation::Quiz(quiz)) = widget else {
            return Vec::new();
        };
        let mut lines = vec![format!("Quiz: {}", quiz.title)];
        for (index, question) in quiz.questions.iter().enumerate() {
            lines.push(format!("  {}. {}", index + 1, question.prompt));
            for (option_index, option) in question.options.iter().enumerate() {
                lines.push(format!("     {}) {}", option_label(option_index), option));
            }
        }
        lines
    }
}

/// a, b, c, ... with a numeric fallback past z
fn option_label(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => char::from(b'a' + i).to_string(),
        _ => (index + 1).to_string(),
    }
}

pub struct MathWidget;

impl WidgetRenderer for MathWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        match widget {
            Widget::Annotation(Annotation::Math(math)) => {
                vec![format!("  {}", render_math(&math.expression))]
            }
            _ => Vec::new(),
        }
    }
}

pub struct CodeBlockWidget;

impl WidgetRenderer for CodeBlockWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Widget::Annotation(Annotation::CodeBlock(block)) = widget else {
            return Vec::new();
        };

        let mut header = block
            .title
            .clone()
            .or_else(|| block.file.clone())
            .unwrap_or_else(|| block.language.clone());
        if let Some(project) = &block.project {
            header.push_str(&format!(" ({project})"));
        }
        if block.title.is_some() {
            if let Some(file) = &block.file {
                header.push_str(&format!(" [{file}]"));
            }
        }

        let mut lines = vec![format!("┌─ {header}")];
        lines.extend(block.code.lines().map(|line| format!("│ {line}")));
        lines.push("└─".to_string());
        lines
    }
}

pub struct ThinkingWidget;

impl WidgetRenderer for ThinkingWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Widget::Annotation(Annotation::Thinking(thinking)) = widget else {
            return Vec::new();
        };
        std::iter::once("Thinking:".to_string())
            .chain(thinking.content.lines().map(|line| format!("  │ {line}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::{CodeBlock, ProcessFlow, Question, Quiz, Step, ThinkingBlock};

    #[test]
    fn test_process_flow() {
        let flow = Annotation::ProcessFlow(ProcessFlow {
            steps: vec![
                Step {
                    id: "1".to_string(),
                    title: "Design".to_string(),
                    description: "Sketch the API".to_string(),
                    status: StepStatus::Completed,
                },
                Step {
                    id: "2".to_string(),
                    title: "Build".to_string(),
                    description: String::new(),
                    status: StepStatus::Active,
                },
                Step {
                    id: "3".to_string(),
                    title: "Ship".to_string(),
                    description: String::new(),
                    status: StepStatus::Pending,
                },
            ],
        });
        assert_eq!(
            ProcessFlowWidget.render(Widget::Annotation(&flow)),
            vec![
                "Process:",
                "  ✓ 1. Design",
                "       Sketch the API",
                "  ▶ 2. Build",
                "  ○ 3. Ship",
            ]
        );
    }

    #[test]
    fn test_quiz_hides_answers() {
        let quiz = Annotation::Quiz(Quiz {
            title: "Rust".to_string(),
            questions: vec![Question {
                id: "q1".to_string(),
                prompt: "Who owns a value?".to_string(),
                options: vec!["Its binding".to_string(), "The heap".to_string()],
                correct_answer_index: 0,
                explanation: Some("Ownership rules".to_string()),
            }],
        });
        assert_eq!(
            QuizWidget.render(Widget::Annotation(&quiz)),
            vec![
                "Quiz: Rust",
                "  1. Who owns a value?",
                "     a) Its binding",
                "     b) The heap",
            ]
        );
    }

    #[test]
    fn test_code_block_header() {
        let block = Annotation::CodeBlock(CodeBlock {
            language: "tsx".to_string(),
            project: Some("Demo".to_string()),
            file: Some("a.tsx".to_string()),
            block_type: Some("react".to_string()),
            title: None,
            code: "const a = 1;\nexport default a;".to_string(),
        });
        assert_eq!(
            CodeBlockWidget.render(Widget::Annotation(&block)),
            vec![
                "┌─ a.tsx (Demo)",
                "│ const a = 1;",
                "│ export default a;",
                "└─",
            ]
        );
    }

    #[test]
    fn test_thinking_and_mismatched_widget() {
        let thinking = Annotation::Thinking(ThinkingBlock {
            content: "First\nSecond".to_string(),
        });
        assert_eq!(
            ThinkingWidget.render(Widget::Annotation(&thinking)),
            vec!["Thinking:", "  │ First", "  │ Second"]
        );
        assert!(MathWidget.render(Widget::Annotation(&thinking)).is_empty());
    }

    #[test]
    fn test_option_labels() {
        assert_eq!(option_label(0), "a");
        assert_eq!(option_label(25), "z");
        assert_eq!(option_label(26), "27");
    }
}
