//! Plain-text rendering of the small LaTeX subset models emit

use regex::{Captures, Regex};
use std::sync::OnceLock;

struct MathPatterns {
    superscript: Regex,
    subscript: Regex,
    fraction: Regex,
    sqrt: Regex,
}

fn patterns() -> &'static MathPatterns {
    static PATTERNS: OnceLock<MathPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| MathPatterns {
        superscript: Regex::new(r"\^(\w+)").expect("valid superscript regex"),
        subscript: Regex::new(r"_(\w+)").expect("valid subscript regex"),
        fraction: Regex::new(r"\\frac\{([^}]+)\}\{([^}]+)\}").expect("valid fraction regex"),
        sqrt: Regex::new(r"\\sqrt\{([^}]+)\}").expect("valid sqrt regex"),
    })
}

const SYMBOLS: [(&str, &str); 7] = [
    (r"\pi", "π"),
    (r"\alpha", "α"),
    (r"\beta", "β"),
    (r"\gamma", "γ"),
    (r"\delta", "δ"),
    (r"\sum", "∑"),
    (r"\int", "∫"),
];

/// Substitute scripts, fractions, roots and Greek letters.
///
/// Substitutions run in a fixed order and are purely textual; anything else
/// is left as written.
pub fn render_math(expression: &str) -> String {
    let p = patterns();
    let text = p
        .superscript
        .replace_all(expression, |caps: &Captures| script(&caps[1], '^', superscript_char));
    let text = p
        .subscript
        .replace_all(&text, |caps: &Captures| script(&caps[1], '_', subscript_char));
    let text = p.fraction.replace_all(&text, "$1⁄$2");
    let mut text = p.sqrt.replace_all(&text, "√($1)").into_owned();

    for (command, symbol) in SYMBOLS {
        text = text.replace(command, symbol);
    }
    text
}

/// Map every character, or fall back to `^(text)` when one has no script form
fn script(text: &str, marker: char, map: fn(char) -> Option<char>) -> String {
    text.chars()
        .map(map)
        .collect::<Option<String>>()
        .unwrap_or_else(|| format!("{marker}({text})"))
}

fn superscript_char(c: char) -> Option<char> {
    Some(match c {
        '0' => '⁰',
        '1' => '¹',
        '2' => '²',
        '3' => '³',
        '4' => '⁴',
        '5' => '⁵',
        '6' => '⁶',
        '7' => '⁷',
        '8' => '⁸',
        '9' => '⁹',
        'i' => 'ⁱ',
        'n' => 'ⁿ',
        'x' => 'ˣ',
        'y' => 'ʸ',
        _ => return None,
    })
}

fn subscript_char(c: char) -> Option<char> {
    Some(match c {
        '0' => '₀',
        '1' => '₁',
        '2' => '₂',
        '3' => '₃',
        '4' => '₄',
        '5' => '₅',
        '6' => '₆',
        '7' => '₇',
        '8' => '₈',
        '9' => '₉',
        'a' => 'ₐ',
        'e' => 'ₑ',
        'i' => 'ᵢ',
        'j' => 'ⱼ',
        'k' => 'ₖ',
        'n' => 'ₙ',
        'o' => 'ₒ',
        'x' => 'ₓ',
        _ => return None,
    })
}
