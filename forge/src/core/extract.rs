//! Recover code and structured payloads from free-form completions.
//!
//! Completions are unreliable containers: fences go missing, JSON arrives
//! wrapped in markdown or single-quoted. Extraction never fails loudly; it
//! returns an empty string or a fallback record and lets the caller choose a
//! corrective path.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::core::types::Track;

/// Fenced blocks shorter than this (after trimming) are ignored.
pub const MIN_BLOCK_CHARS: usize = 20;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:[\w+#.-]+)?[ \t]*\r?\n([\s\S]*?)(?:```|\z)").expect("fence regex")
});
static CPP_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"int\s+main").expect("cpp entry regex"));
static PY_ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"if\s+__name__").expect("python entry regex"));
static CPP_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#include\s*<|int\s+main\s*\(").expect("cpp start regex"));
static PY_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"def\s+solution|if\s+__name__\s*==|import\s+sys").expect("python start regex")
});
static CPP_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#include|int\s+main\s*\(").expect("cpp hint regex"));
static PY_HINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"def\s+|class\s+|import\s+").expect("python hint regex"));
static JSON_FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```json").expect("json fence regex"));

/// Extract the single executable code block from a completion.
///
/// Among fenced blocks longer than [`MIN_BLOCK_CHARS`], prefers one with a C++
/// entry point, then one with a Python main guard, then the last block. With
/// no fences, falls back to the first track-identifying token and returns the
/// rest of the text. Returns an empty string when nothing looks like code.
pub fn extract_code(text: &str) -> String {
    let blocks: Vec<&str> = FENCE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|block| block.chars().count() > MIN_BLOCK_CHARS)
        .collect();

    if let Some(block) = blocks.iter().find(|b| CPP_ENTRY_RE.is_match(b)) {
        return (*block).to_string();
    }
    if let Some(block) = blocks.iter().find(|b| PY_ENTRY_RE.is_match(b)) {
        return (*block).to_string();
    }
    if let Some(block) = blocks.last() {
        return (*block).to_string();
    }

    if let Some(m) = CPP_START_RE.find(text) {
        return text[m.start()..].trim().to_string();
    }
    if let Some(m) = PY_START_RE.find(text) {
        return text[m.start()..].trim().to_string();
    }
    String::new()
}

/// Whether the text plausibly contains source code at all.
pub fn contains_code(text: &str) -> bool {
    text.contains("```") || CPP_HINT_RE.is_match(text) || PY_HINT_RE.is_match(text)
}

/// Guess the track of a candidate from its surface form.
///
/// This is a textual heuristic: a python fence or any `def ` token selects
/// the interpreted track, everything else is treated as C++.
pub fn detect_track(text: &str) -> Track {
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("```python") || lowered.contains("```py\n") || text.contains("def ") {
        Track::Python
    } else {
        Track::Cpp
    }
}

/// Remove markdown fence markers around a JSON payload.
pub fn strip_json_fences(text: &str) -> String {
    if text.trim().is_empty() {
        return "{}".to_string();
    }
    let without_lang = JSON_FENCE_RE.replace_all(text, "");
    without_lang.replace("```", "").trim().to_string()
}

/// Parse a structured completion into a JSON value.
///
/// Layers: strict parse, then the outermost `{..}`/`[..]` span, then a
/// single-quote repair. Each repair is logged. If all fail, returns a
/// fallback object `{"raw": <text>}` instead of an error.
pub fn extract_structured(text: &str) -> Value {
    let cleaned = strip_json_fences(text);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return value;
    }

    if let Some(span) = outer_json_span(&cleaned)
        && let Ok(value) = serde_json::from_str::<Value>(span)
    {
        debug!(repair = "outer_span", "recovered structured output");
        return value;
    }

    let requoted = cleaned.replace('\'', "\"");
    if let Ok(value) = serde_json::from_str::<Value>(&requoted) {
        debug!(repair = "single_quotes", "recovered structured output");
        return value;
    }

    warn!(bytes = text.len(), "structured output unparsable, using fallback record");
    json!({ "raw": text })
}

/// Slice from the first opening bracket to the last matching closing bracket.
fn outer_json_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Read a string member from a structured record, empty when absent.
pub fn text_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Read a boolean member, accepting `"true"`/`"false"` strings.
pub fn bool_field(value: &Value, key: &str) -> bool {
    match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}
