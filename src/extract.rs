//! Normalizes raw model output into a bare LaTeX string.

use regex::Regex;
use std::sync::OnceLock;

fn fenced_regex() -> &'static Regex {
    static FENCED: OnceLock<Regex> = OnceLock::new();
    FENCED.get_or_init(|| {
        Regex::new(r"(?s)^```(?:latex|tex|math)?\s*(.*?)\s*```$").expect("valid fenced regex")
    })
}

fn display_regex() -> &'static Regex {
    static DISPLAY: OnceLock<Regex> = OnceLock::new();
    DISPLAY.get_or_init(|| Regex::new(r"(?s)^\$\$\s*(.*?)\s*\$\$$").expect("valid display regex"))
}

fn inline_regex() -> &'static Regex {
    static INLINE: OnceLock<Regex> = OnceLock::new();
    INLINE.get_or_init(|| Regex::new(r"^\$\s*([^$]*?)\s*\$$").expect("valid inline regex"))
}

/// Strips code fences or math delimiters from a model reply.
///
/// The first matching wrapper wins: a fenced block (optionally tagged
/// `latex`, `tex` or `math`), then `$$...$$`, then `$...$`. Fenced and
/// display captures have their newlines folded into spaces. Anything else is
/// returned trimmed.
pub fn extract(raw: &str) -> String {
    let text = raw.trim();

    if let Some(caps) = fenced_regex().captures(text) {
        return collapse_newlines(caps[1].trim());
    }
    if let Some(caps) = display_regex().captures(text) {
        return collapse_newlines(caps[1].trim());
    }
    if let Some(caps) = inline_regex().captures(text) {
        return caps[1].trim().to_string();
    }
    text.to_string()
}

fn collapse_newlines(s: &str) -> String {
    s.replace("\r\n", " ").replace('\n', " ")
}
