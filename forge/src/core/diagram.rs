//! Render a visualizer's node/edge payload as a Mermaid flowchart.

use serde_json::Value;

use crate::core::extract::text_field;

pub const EMPTY_DIAGRAM: &str = "graph TD\nA(No data)";
pub const FAILED_DIAGRAM: &str = "graph TD\nA(Diagram generation failed)";

/// Build a `graph TD` diagram from `{nodes: [{id, text}], edges: [{from, to, label}]}`.
///
/// Labels are reduced to letters, digits and single spaces so the output
/// always parses as Mermaid. Edges with a missing endpoint are skipped.
pub fn mermaid_from_value(value: &Value) -> String {
    if !value.is_object() || value.get("raw").is_some() {
        return FAILED_DIAGRAM.to_string();
    }
    let nodes = value
        .get("nodes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    if nodes.is_empty() {
        return EMPTY_DIAGRAM.to_string();
    }

    let mut lines = vec!["graph TD".to_string()];
    for node in nodes {
        let mut id = node_id(&text_field(node, "id"));
        if id.is_empty() {
            id = "A".to_string();
        }
        let mut label = safe_label(&text_field(node, "text"));
        if label.is_empty() {
            label = "Step".to_string();
        }
        lines.push(format!("{id}(\"{label}\")"));
    }

    let edges = value
        .get("edges")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for edge in edges {
        let from = node_id(&text_field(edge, "from"));
        let to = node_id(&text_field(edge, "to"));
        if from.is_empty() || to.is_empty() {
            continue;
        }
        let label = safe_label(&text_field(edge, "label"));
        if label.is_empty() {
            lines.push(format!("{from} --> {to}"));
        } else {
            lines.push(format!("{from} -- \"{label}\" --> {to}"));
        }
    }
    lines.join("\n")
}

fn node_id(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

fn safe_label(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}
