//! Tolerant parsing of test-case payloads.

use serde_json::Value;
use tracing::debug;

use crate::core::extract::extract_structured;
use crate::core::types::{TestCase, value_to_text};

/// Parse a structured test-case payload into an ordered case list.
///
/// Accepts a bare array of `{input, output}` records or an object whose first
/// array-valued member is the list. String items are reparsed as (possibly
/// single-quoted) JSON. Items without an `input` member are dropped.
pub fn parse_test_cases(payload: &Value) -> Vec<TestCase> {
    let items: &[Value] = match payload {
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(items) = map.values().find_map(Value::as_array) {
                debug!(repair = "keyed_container", "unwrapped test case list");
                items
            } else if map.contains_key("input") {
                debug!(repair = "single_record", "treating object as one test case");
                std::slice::from_ref(payload)
            } else {
                return Vec::new();
            }
        }
        _ => return Vec::new(),
    };

    let mut cases = Vec::with_capacity(items.len());
    for item in items {
        let reparsed;
        let record = match item {
            Value::String(text) => {
                debug!(repair = "string_record", "reparsing string test case");
                reparsed = extract_structured(text);
                &reparsed
            }
            other => other,
        };
        if let Some(case) = record_to_case(record) {
            cases.push(case);
        }
    }
    cases
}

fn record_to_case(record: &Value) -> Option<TestCase> {
    let input = record.get("input")?;
    let expected = ["output", "expected_output", "expected"]
        .iter()
        .find_map(|key| record.get(*key))
        .map(value_to_text)
        .unwrap_or_default();
    Some(TestCase {
        input: value_to_text(input),
        expected_output: expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(input: &str, output: &str) -> TestCase {
        TestCase {
            input: input.to_string(),
            expected_output: output.to_string(),
        }
    }

    #[test]
    fn bare_array_is_accepted_in_order() {
        let payload = json!([
            {"input": "3\n1 2 3", "output": "6"},
            {"input": "1\n5", "output": "5"}
        ]);
        assert_eq!(
            parse_test_cases(&payload),
            vec![case("3\n1 2 3", "6"), case("1\n5", "5")]
        );
    }

    #[test]
    fn keyed_container_uses_first_array_member() {
        let payload = json!({
            "note": "extracted",
            "cases": [{"input": "1", "output": "1"}],
            "extra": [{"input": "ignored", "output": "x"}]
        });
        assert_eq!(parse_test_cases(&payload), vec![case("1", "1")]);
    }

    #[test]
    fn duplicates_are_kept() {
        let payload = json!([{"input": "1", "output": "1"}, {"input": "1", "output": "1"}]);
        assert_eq!(parse_test_cases(&payload).len(), 2);
    }

    #[test]
    fn single_quoted_string_records_are_reparsed() {
        let payload = json!(["{'input': '2 2', 'output': '4'}", "garbage"]);
        assert_eq!(parse_test_cases(&payload), vec![case("2 2", "4")]);
    }

    #[test]
    fn numeric_values_become_text_and_missing_output_is_empty() {
        let payload = json!([{"input": 7, "output": 49}, {"input": "x"}, {"output": "orphan"}]);
        assert_eq!(
            parse_test_cases(&payload),
            vec![case("7", "49"), case("x", "")]
        );
    }

    #[test]
    fn unusable_payloads_yield_nothing() {
        assert!(parse_test_cases(&json!({})).is_empty());
        assert!(parse_test_cases(&json!({"raw": "no json here"})).is_empty());
        assert!(parse_test_cases(&json!("text")).is_empty());
    }
}
