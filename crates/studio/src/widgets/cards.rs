use super::{Widget, WidgetRenderer};
use crate::tools::{ToolName, ToolPayload, ToolResult};

/// Shown while a tool call has no result yet
pub fn pending_text(tool_name: ToolName) -> &'static str {
    match tool_name {
        ToolName::GetWeather => "Getting weather data...",
        ToolName::GetStockPrice => "Fetching stock information...",
        ToolName::AnalyzeCode => "Analyzing code...",
    }
}

fn tool_result<'a>(widget: Widget<'a>) -> Option<&'a ToolResult> {
    match widget {
        Widget::Tool(result) => Some(result),
        Widget::Annotation(_) => None,
    }
}

pub struct WeatherWidget;

impl WidgetRenderer for WeatherWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Some(result) = tool_result(widget) else {
            return Vec::new();
        };
        match &result.payload {
            Some(ToolPayload::Weather(report)) => vec![
                format!(
                    "Weather in {}: {}°C, {}",
                    report.location, report.temperature, report.condition
                ),
                format!(
                    "  Humidity {}%, wind {} km/h",
                    report.humidity, report.wind_speed
                ),
            ],
            _ => vec![pending_text(result.tool_name).to_string()],
        }
    }
}

pub struct StockWidget;

impl WidgetRenderer for StockWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Some(result) = tool_result(widget) else {
            return Vec::new();
        };
        match &result.payload {
            Some(ToolPayload::Stock(quote)) => {
                let trend = if quote.change >= 0.0 { '▲' } else { '▼' };
                let sign = if quote.change >= 0.0 { "+" } else { "" };
                vec![
                    format!(
                        "{} ${:.2} {} {}{:.2}",
                        quote.symbol, quote.price, trend, sign, quote.change
                    ),
                    format!("  Volume: {}", group_thousands(quote.volume)),
                ]
            }
            _ => vec![pending_text(result.tool_name).to_string()],
        }
    }
}

pub struct CodeAnalysisWidget;

impl WidgetRenderer for CodeAnalysisWidget {
    fn render(&self, widget: Widget<'_>) -> Vec<String> {
        let Some(result) = tool_result(widget) else {
            return Vec::new();
        };
        let Some(ToolPayload::CodeAnalysis(report)) = &result.payload else {
            return vec![pending_text(result.tool_name).to_string()];
        };

        let mut lines = vec![
            format!("Code analysis ({})", report.language),
            format!(
                "  {} lines, {} complexity, performance {}/100",
                report.lines_of_code, report.complexity, report.performance
            ),
        ];
        if !report.suggestions.is_empty() {
            lines.push("  Suggestions:".to_string());
            lines.extend(report.suggestions.iter().map(|s| format!("    - {s}")));
        }
        lines
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CodeAnalysisReport, Complexity, StockQuote};

    #[test]
    fn test_stock_card() {
        let result = ToolResult::completed(
            "c1",
            ToolPayload::Stock(StockQuote {
                symbol: "AAPL".to_string(),
                price: 189.5,
                change: -2.25,
                volume: 1_234_567,
            }),
        );
        assert_eq!(
            StockWidget.render(Widget::Tool(&result)),
            vec!["AAPL $189.50 ▼ -2.25", "  Volume: 1,234,567"]
        );
    }

    #[test]
    fn test_code_analysis_card() {
        let result = ToolResult::completed(
            "c1",
            ToolPayload::CodeAnalysis(CodeAnalysisReport {
                language: "rust".to_string(),
                lines_of_code: 30,
                complexity: Complexity::Medium,
                suggestions: vec!["Add tests".to_string()],
                performance: 72,
            }),
        );
        assert_eq!(
            CodeAnalysisWidget.render(Widget::Tool(&result)),
            vec![
                "Code analysis (rust)",
                "  30 lines, medium complexity, performance 72/100",
                "  Suggestions:",
                "    - Add tests",
            ]
        );
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(12_345_678), "12,345,678");
    }
}
