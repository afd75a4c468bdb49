//! Verdict arithmetic: sanitizing audit payloads and the convergence rules.

use serde_json::Value;

use crate::core::extract::{bool_field, text_field};
use crate::core::normalize::truncate_chars;
use crate::core::types::Verdict;

/// A round is accepted at or above this score (when execution also passed).
pub const PASS_SCORE: u32 = 95;
/// Score a plateaued or trivially-critiqued audit is escalated to.
pub const CONVERGED_SCORE: u32 = 95;
/// Score assigned to a round whose execution failed.
pub const DEBUG_SCORE: u32 = 40;
/// Score reported once the terminal improver pass has run.
pub const FINAL_SCORE: u32 = 100;

const STAGNATION_FLOOR: u32 = 85;
const TERSE_FLOOR: u32 = 90;
const TERSE_CRITIQUE_CHARS: usize = 15;
const MIN_CRITIQUE_CHARS: usize = 5;
const DEFAULT_CRITIQUE: &str = "The code meets the conventions.";

/// Turn an auditor's structured output into a [`Verdict`].
///
/// Non-object payloads yield a zero-score verdict quoting the raw text. A
/// missing or near-empty critique falls back to `suggestion`, then to a fixed
/// sentence.
pub fn sanitize_verdict(value: &Value, raw_text: &str) -> Verdict {
    if !value.is_object() || value.get("raw").is_some() {
        return Verdict::failing(
            0,
            format!("parse error: {}...", truncate_chars(raw_text, 100)),
        );
    }
    let mut critique = substantive_critique(value);
    if critique.is_empty() {
        critique = DEFAULT_CRITIQUE.to_string();
    }
    Verdict {
        score: score_field(value),
        pass: bool_field(value, "pass"),
        critique,
    }
}

/// Whether the auditor said essentially nothing: no critique (or suggestion)
/// of meaningful length.
pub fn is_terse(value: &Value) -> bool {
    substantive_critique(value).chars().count() < TERSE_CRITIQUE_CHARS
}

fn substantive_critique(value: &Value) -> String {
    let critique = text_field(value, "critique");
    if critique.trim().chars().count() >= MIN_CRITIQUE_CHARS {
        return critique;
    }
    text_field(value, "suggestion")
}

/// Coerce a `score` member to `0..=100`, accepting numbers and numeric strings.
pub fn score_field(value: &Value) -> u32 {
    let raw = match value.get("score") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    raw.clamp(0.0, 100.0) as u32
}

/// Anti-stagnation escalation.
///
/// A raw score of at least 90 with a terse critique, or a raw score of at
/// least 85 identical to the previous audited round, is treated as converged.
/// This can mask a stable unresolved defect; it is kept as a deliberate trust
/// decision.
pub fn apply_convergence(
    mut verdict: Verdict,
    terse: bool,
    previous_score: Option<u32>,
) -> Verdict {
    let raw = verdict.score;
    let trivially_clean = raw >= TERSE_FLOOR && terse;
    let plateaued = raw >= STAGNATION_FLOOR && previous_score == Some(raw);
    if trivially_clean || plateaued {
        verdict.score = raw.max(CONVERGED_SCORE);
    }
    verdict
}

/// Verdict for a round whose execution failed, built from the debugger's
/// `{analysis, suggestion}` payload.
pub fn debug_verdict(value: &Value) -> Verdict {
    let analysis = non_empty_or(text_field(value, "analysis"), "no analysis available");
    let suggestion = non_empty_or(text_field(value, "suggestion"), "no suggestion available");
    Verdict::failing(
        DEBUG_SCORE,
        format!("**Failure analysis**: {analysis}\n\n**Fix plan**: {suggestion}"),
    )
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}
