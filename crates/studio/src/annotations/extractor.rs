use super::{
    Annotation, AnnotationKind, CodeBlock, Extraction, MathBlock, ParseWarning, PendingMarker,
    ProcessFlow, Question, Quiz, Step, ThinkingBlock,
};
use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;
use tracing::debug;

const FENCE: &str = "```";
const MATH_DELIMITER: &str = "$$";
const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";
const TAG_CLOSE: &str = "/>";

/// Openers that may still be completed by a later delta
const TEXT_OPENERS: &[&str] = &[
    MATH_DELIMITER,
    THINKING_OPEN,
    "<ProcessFlow",
    "<LinearProcessFlow",
    "<Quiz",
];

/// Extract all markers from a finished text.
///
/// Unterminated openers are left in the residual text as ordinary characters.
pub fn extract(text: &str) -> Extraction {
    let mut scanner = Scanner::new(text, false);
    scanner.run();
    scanner.finish(text.len())
}

/// Extract markers from text that is still growing.
///
/// Scanning stops at the first opener whose closing delimiter is missing, and
/// a trailing suffix that could still turn into an opener is held back, so the
/// residual text never shows half a marker.
pub fn extract_streaming(text: &str) -> Extraction {
    let mut scanner = Scanner::new(text, true);
    scanner.run();

    let cut = match scanner.pending {
        Some(pending) => pending.offset,
        None => {
            let consumed = scanner.found.last().map_or(0, |(span, _)| span.end);
            partial_opener_start(text, consumed).unwrap_or(text.len())
        }
    };
    scanner.finish(cut)
}

struct Scanner<'a> {
    text: &'a str,
    streaming: bool,
    found: Vec<(Range<usize>, Annotation)>,
    warnings: Vec<ParseWarning>,
    pending: Option<PendingMarker>,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str, streaming: bool) -> Self {
        Self {
            text,
            streaming,
            found: Vec::new(),
            warnings: Vec::new(),
            pending: None,
        }
    }

    /// Fenced blocks are located first so their bodies are never scanned for
    /// other markers; the text between fences is scanned afterwards.
    fn run(&mut self) {
        let (fences, unclosed) = scan_fences(self.text);

        let mut segment_start = 0;
        for (span, block) in fences {
            if !self.scan_segment(segment_start, span.start) {
                return;
            }
            segment_start = span.end;
            self.found.push((span, Annotation::CodeBlock(block)));
        }

        match unclosed {
            Some(offset) if self.streaming => {
                if self.scan_segment(segment_start, offset) {
                    self.pending = Some(PendingMarker {
                        kind: AnnotationKind::CodeBlock,
                        offset,
                    });
                }
            }
            Some(offset) => {
                self.warn(
                    AnnotationKind::CodeBlock,
                    offset,
                    "code fence is never closed".to_string(),
                );
                self.scan_segment(segment_start, self.text.len());
            }
            None => {
                self.scan_segment(segment_start, self.text.len());
            }
        }
    }

    /// Scan `text[start..end]` for inline markers. Returns false once a pending
    /// marker stops a streaming scan.
    fn scan_segment(&mut self, start: usize, end: usize) -> bool {
        let mut pos = start;
        while let Some(rel) = self.text[pos..end].find(|c: char| c == '<' || c == '$') {
            let at = pos + rel;
            let rest = &self.text[at..end];

            let (kind, outcome) = if rest.starts_with(THINKING_OPEN) {
                (AnnotationKind::Thinking, scan_thinking(rest))
            } else if rest.starts_with('<') {
                match scan_component_tag(rest) {
                    Some((kind, outcome)) => (kind, outcome),
                    None => {
                        pos = at + 1;
                        continue;
                    }
                }
            } else if rest.starts_with(MATH_DELIMITER) {
                (AnnotationKind::Math, scan_math(rest))
            } else {
                pos = at + 1;
                continue;
            };

            match outcome {
                ScanOutcome::Complete { len, annotation } => {
                    self.found.push((at..at + len, annotation));
                    pos = at + len;
                }
                ScanOutcome::Malformed { len, message } => {
                    self.warn(kind, at, message);
                    pos = at + len;
                }
                ScanOutcome::Incomplete if self.streaming => {
                    self.pending = Some(PendingMarker { kind, offset: at });
                    return false;
                }
                ScanOutcome::Incomplete => {
                    self.warn(kind, at, "marker is never closed".to_string());
                    // Skip the opener only, its contents may hold other markers
                    pos = at + if kind == AnnotationKind::Math { 2 } else { 1 };
                }
            }
        }
        true
    }

    fn warn(&mut self, marker: AnnotationKind, offset: usize, message: String) {
        let warning = ParseWarning {
            marker,
            offset,
            message,
        };
        debug!("Skipping marker: {}", warning);
        self.warnings.push(warning);
    }

    fn finish(mut self, cut: usize) -> Extraction {
        self.found.retain(|(span, _)| span.end <= cut);
        self.found.sort_by_key(|(span, _)| span.start);
        self.warnings.retain(|warning| warning.offset < cut);

        let spans: Vec<Range<usize>> = self.found.iter().map(|(span, _)| span.clone()).collect();
        Extraction {
            residual: strip_spans(&self.text[..cut], &spans),
            annotations: self.found.into_iter().map(|(_, a)| a).collect(),
            warnings: self.warnings,
            pending: self.pending,
        }
    }
}

enum ScanOutcome {
    /// A marker spanning `len` bytes was parsed
    Complete { len: usize, annotation: Annotation },
    /// A marker spanning `len` bytes is kept as text
    Malformed { len: usize, message: String },
    /// The closing delimiter is missing
    Incomplete,
}

fn scan_math(rest: &str) -> ScanOutcome {
    let body_start = MATH_DELIMITER.len();
    match rest[body_start..].find(MATH_DELIMITER) {
        Some(close) => ScanOutcome::Complete {
            len: body_start + close + MATH_DELIMITER.len(),
            annotation: Annotation::Math(MathBlock {
                expression: rest[body_start..body_start + close].to_string(),
            }),
        },
        None => ScanOutcome::Incomplete,
    }
}

fn scan_thinking(rest: &str) -> ScanOutcome {
    let body_start = THINKING_OPEN.len();
    match rest[body_start..].find(THINKING_CLOSE) {
        Some(close) => ScanOutcome::Complete {
            len: body_start + close + THINKING_CLOSE.len(),
            annotation: Annotation::Thinking(ThinkingBlock {
                content: rest[body_start..body_start + close].trim().to_string(),
            }),
        },
        None => ScanOutcome::Incomplete,
    }
}

enum AttributeValue<'a> {
    /// Contents between the outer braces of `name={...}`
    Json(&'a str),
    /// Contents between the quotes of `name="..."`
    Quoted(&'a str),
}

/// Returns None when `rest` does not start with one of the known component tags.
fn scan_component_tag(rest: &str) -> Option<(AnnotationKind, ScanOutcome)> {
    let name_len = rest[1..]
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len() - 1);
    let name = &rest[1..1 + name_len];
    let kind = match name {
        "ProcessFlow" | "LinearProcessFlow" => AnnotationKind::ProcessFlow,
        "Quiz" => AnnotationKind::Quiz,
        _ => return None,
    };

    let mut pos = 1 + name_len;
    if pos == rest.len() {
        return Some((kind, ScanOutcome::Incomplete));
    }
    if !rest[pos..].starts_with(|c: char| c.is_whitespace() || c == '/') {
        return None;
    }

    let mut attributes: Vec<(&str, AttributeValue)> = Vec::new();
    loop {
        pos += leading_whitespace(&rest[pos..]);
        let tail = &rest[pos..];
        if tail.is_empty() {
            return Some((kind, ScanOutcome::Incomplete));
        }
        if tail.starts_with(TAG_CLOSE) {
            pos += TAG_CLOSE.len();
            break;
        }
        if TAG_CLOSE.starts_with(tail) {
            return Some((kind, ScanOutcome::Incomplete));
        }

        let attr_len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        if attr_len == tail.len() {
            return Some((kind, ScanOutcome::Incomplete));
        }
        if attr_len == 0 || !tail[attr_len..].starts_with('=') {
            return Some((kind, malformed_until_close(rest, "expected an attribute")));
        }
        let attr_name = &tail[..attr_len];
        let value_start = pos + attr_len + 1;
        let value_rest = &rest[value_start..];

        if value_rest.starts_with('{') {
            match balanced_braces_len(value_rest) {
                Some(len) => {
                    attributes.push((attr_name, AttributeValue::Json(&value_rest[1..len - 1])));
                    pos = value_start + len;
                }
                None => {
                    return Some((
                        kind,
                        malformed_after(rest, value_start, &format!("unbalanced braces in `{attr_name}`")),
                    ))
                }
            }
        } else if let Some(quoted) = value_rest.strip_prefix('"') {
            match quoted.find('"') {
                Some(close) => {
                    attributes.push((attr_name, AttributeValue::Quoted(&quoted[..close])));
                    pos = value_start + close + 2;
                }
                None => {
                    return Some((
                        kind,
                        malformed_after(rest, value_start, &format!("unterminated `{attr_name}` value")),
                    ))
                }
            }
        } else if value_rest.is_empty() {
            return Some((kind, ScanOutcome::Incomplete));
        } else {
            return Some((
                kind,
                malformed_until_close(rest, &format!("unsupported value for `{attr_name}`")),
            ));
        }
    }

    let outcome = match build_component(kind, &attributes) {
        Ok(annotation) => ScanOutcome::Complete {
            len: pos,
            annotation,
        },
        Err(message) => ScanOutcome::Malformed { len: pos, message },
    };
    Some((kind, outcome))
}

fn malformed_until_close(rest: &str, message: &str) -> ScanOutcome {
    malformed_after(rest, 0, message)
}

/// The tag runs to the first `/>` at or after `from`. Without one it may
/// still be arriving.
fn malformed_after(rest: &str, from: usize, message: &str) -> ScanOutcome {
    match rest[from..].find(TAG_CLOSE) {
        Some(close) => ScanOutcome::Malformed {
            len: from + close + TAG_CLOSE.len(),
            message: message.to_string(),
        },
        None => ScanOutcome::Incomplete,
    }
}

fn build_component(
    kind: AnnotationKind,
    attributes: &[(&str, AttributeValue)],
) -> Result<Annotation, String> {
    let json = |name: &str| {
        attributes.iter().find_map(|(attr, value)| match value {
            AttributeValue::Json(raw) if *attr == name => Some(raw.trim()),
            _ => None,
        })
    };
    let quoted = |name: &str| {
        attributes.iter().find_map(|(attr, value)| match value {
            AttributeValue::Quoted(text) if *attr == name => Some(text.to_string()),
            _ => None,
        })
    };

    match kind {
        AnnotationKind::ProcessFlow => {
            let raw = json("steps").ok_or("missing `steps` attribute")?;
            let steps: Vec<Step> =
                serde_json::from_str(raw).map_err(|e| format!("invalid steps: {e}"))?;
            Ok(Annotation::ProcessFlow(ProcessFlow { steps }))
        }
        AnnotationKind::Quiz => {
            let raw = json("questions").ok_or("missing `questions` attribute")?;
            let questions: Vec<Question> =
                serde_json::from_str(raw).map_err(|e| format!("invalid questions: {e}"))?;
            if let Some(question) = questions
                .iter()
                .find(|q| q.correct_answer_index >= q.options.len())
            {
                return Err(format!(
                    "question {} has answer {} but only {} options",
                    question.id,
                    question.correct_answer_index,
                    question.options.len()
                ));
            }
            Ok(Annotation::Quiz(Quiz {
                title: quoted("title").unwrap_or_else(|| "Quiz".to_string()),
                questions,
            }))
        }
        _ => Err(format!("{kind} is not a component tag")),
    }
}

/// Length of a `{...}` group including both braces, respecting JSON strings.
/// None when the group is not closed within `text`.
fn balanced_braces_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn leading_whitespace(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn fence_attribute_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid attribute regex"))
}

/// Lines of `text` as (start offset, line without its newline, end offset
/// including the newline)
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str, usize)> {
    let mut start = 0;
    text.split_inclusive('\n').map(move |line| {
        let line_start = start;
        start += line.len();
        (line_start, line.strip_suffix('\n').unwrap_or(line), start)
    })
}

/// Locate all closed code fences. Also returns the offset of a fence opener
/// that has no closing fence.
fn scan_fences(text: &str) -> (Vec<(Range<usize>, CodeBlock)>, Option<usize>) {
    let mut fences = Vec::new();
    let mut lines = lines_with_offsets(text);

    while let Some((open_start, open_line, body_start)) = lines.find(|(_, line, _)| {
        line.trim_start().starts_with(FENCE)
    }) {
        let Some((close_start, close_line, _)) =
            lines.find(|(_, line, _)| line.trim() == FENCE)
        else {
            return (fences, Some(open_start));
        };

        // The newline before the closing fence is not part of the body
        let body = if close_start > body_start {
            text[body_start..close_start]
                .strip_suffix('\n')
                .unwrap_or(&text[body_start..close_start])
        } else {
            ""
        };
        let header = &open_line.trim_start()[FENCE.len()..];
        let block = parse_fence_header(header, body);
        fences.push((open_start..close_start + close_line.len(), block));
    }

    (fences, None)
}

fn parse_fence_header(header: &str, code: &str) -> CodeBlock {
    let header = header.trim();
    let language_len = header
        .find(char::is_whitespace)
        .unwrap_or(header.len());
    let (language, attributes) = if header[..language_len].contains('=') {
        ("", header)
    } else {
        (&header[..language_len], &header[language_len..])
    };

    let mut block = CodeBlock {
        language: if language.is_empty() {
            "text".to_string()
        } else {
            language.to_string()
        },
        project: None,
        file: None,
        block_type: None,
        title: None,
        code: code.to_string(),
    };

    for captures in fence_attribute_regex().captures_iter(attributes) {
        let value = Some(captures[2].to_string());
        match &captures[1] {
            "project" => block.project = value,
            "file" => block.file = value,
            "type" => block.block_type = value,
            "title" => block.title = value,
            other => debug!("Ignoring unknown code block attribute `{}`", other),
        }
    }
    block
}

/// Start of a trailing suffix (at or after `consumed`) that is a proper prefix
/// of a marker opener.
fn partial_opener_start(text: &str, consumed: usize) -> Option<usize> {
    let tail = &text[consumed..];

    // Backticks at the start of the last line may grow into a fence
    let last_line_start = tail.rfind('\n').map_or(0, |i| i + 1);
    let last_line = &tail[last_line_start..];
    let backticks = last_line.trim_start();
    if !backticks.is_empty() && FENCE.starts_with(backticks) && backticks != FENCE {
        let at_line_start = last_line_start > 0 || consumed == 0 || text[..consumed].ends_with('\n');
        if at_line_start {
            return Some(consumed + last_line_start + (last_line.len() - backticks.len()));
        }
    }

    // Longest suffix first; openers are ASCII, so only ASCII boundaries matter
    let max_len = TEXT_OPENERS.iter().map(|o| o.len() - 1).max().unwrap_or(0);
    for len in (1..=max_len.min(tail.len())).rev() {
        let start = tail.len() - len;
        if !tail.is_char_boundary(start) {
            continue;
        }
        let suffix = &tail[start..];
        if TEXT_OPENERS
            .iter()
            .any(|opener| opener.len() > suffix.len() && opener.starts_with(suffix))
        {
            return Some(consumed + start);
        }
    }
    None
}

/// Remove `spans` from `text`. Lines that lose content to a span and end up
/// holding only whitespace are dropped together with their newline.
fn strip_spans(text: &str, spans: &[Range<usize>]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut span_index = 0;

    for (line_start, _, line_end) in lines_with_offsets(text) {
        let mut kept = String::new();
        let mut touched = false;
        let mut cursor = line_start;

        while let Some(span) = spans.get(span_index) {
            if span.start >= line_end {
                break;
            }
            let start = span.start.max(line_start);
            let end = span.end.min(line_end);
            if start < end {
                touched = true;
                kept.push_str(&text[cursor..start]);
                cursor = end;
            }
            if span.end <= line_end {
                span_index += 1;
            } else {
                break;
            }
        }
        kept.push_str(&text[cursor..line_end]);

        if !(touched && kept.trim().is_empty()) {
            out.push_str(&kept);
        }
    }
    out
}
