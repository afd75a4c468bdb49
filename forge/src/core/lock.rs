//! Architecture lock: structural continuity between code revisions.
//!
//! Both revisions are parsed into a syntax tree for their track and reduced
//! to a declaration surface (named function and type definitions). Every
//! name in the original surface must survive into the candidate.

use std::collections::BTreeSet;
use std::fmt;

use tree_sitter::{Node, Parser};

use crate::core::types::{Blueprint, Track};

/// Why the lock rejected a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockViolation {
    /// Declarations present in the original are gone from the candidate.
    Missing(Vec<String>),
    /// One of the revisions did not parse cleanly.
    Unparsable { revision: Revision, reason: String },
    /// The candidate switched tracks, so its surface is not comparable.
    TrackChanged { from: Track, to: Track },
}

/// Which side of the comparison failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    Original,
    Candidate,
}

impl fmt::Display for LockViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockViolation::Missing(names) => {
                write!(f, "core declarations removed: {}", names.join(", "))
            }
            LockViolation::Unparsable { revision, reason } => {
                let side = match revision {
                    Revision::Original => "original",
                    Revision::Candidate => "candidate",
                };
                write!(f, "{side} revision failed to parse: {reason}")
            }
            LockViolation::TrackChanged { from, to } => {
                write!(f, "candidate switched language from {from} to {to}")
            }
        }
    }
}

/// Compare two revisions of the same track.
///
/// Passes iff every declaration name in `original` also appears in
/// `candidate`. Missing names are reported sorted.
pub fn enforce_architecture_lock(
    original: &str,
    candidate: &str,
    track: Track,
) -> Result<(), LockViolation> {
    let before = declaration_surface(original, track).map_err(|reason| {
        LockViolation::Unparsable {
            revision: Revision::Original,
            reason,
        }
    })?;
    let after = declaration_surface(candidate, track).map_err(|reason| {
        LockViolation::Unparsable {
            revision: Revision::Candidate,
            reason,
        }
    })?;

    let missing: Vec<String> = before.difference(&after).cloned().collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LockViolation::Missing(missing))
    }
}

/// Human-readable critique for a lock rejection.
pub fn violation_critique(violation: &LockViolation, blueprint: Option<&Blueprint>) -> String {
    let mut msg = format!("**Architecture lock triggered**: {violation}. Restore the original structure!");
    if let Some(blueprint) = blueprint {
        msg.push_str(&format!(
            " The approved design ({}) must be kept.",
            blueprint.algorithm_label()
        ));
    }
    msg
}

/// Parse `code` and collect the names of its function and type definitions.
pub fn declaration_surface(code: &str, track: Track) -> Result<BTreeSet<String>, String> {
    let mut parser = Parser::new();
    let language: tree_sitter::Language = match track {
        Track::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        Track::Python => tree_sitter_python::LANGUAGE.into(),
    };
    parser
        .set_language(&language)
        .map_err(|err| format!("load {track} grammar: {err}"))?;
    let tree = parser
        .parse(code, None)
        .ok_or_else(|| "parser returned no tree".to_string())?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(match first_error(root) {
            Some(node) => format!("syntax error at line {}", node.start_position().row + 1),
            None => "syntax error".to_string(),
        });
    }

    let source = code.as_bytes();
    let mut names = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        let name = match track {
            Track::Python => python_declaration(node, source),
            Track::Cpp => cpp_declaration(node, source),
        };
        if let Some(name) = name {
            names.insert(name);
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }
    Ok(names)
}

fn python_declaration(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "function_definition" | "class_definition" => {
            node_text(node.child_by_field_name("name")?, source)
        }
        _ => None,
    }
}

fn cpp_declaration(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "function_definition" => {
            let declarator = node.child_by_field_name("declarator")?;
            node_text(innermost_declarator(declarator), source)
        }
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
            // `struct Foo x;` references a type; only bodies declare one.
            node.child_by_field_name("body")?;
            node_text(node.child_by_field_name("name")?, source)
        }
        _ => None,
    }
}

/// Descend through pointer/reference/function declarators to the name.
fn innermost_declarator(mut node: Node<'_>) -> Node<'_> {
    loop {
        match node.kind() {
            "function_declarator"
            | "pointer_declarator"
            | "reference_declarator"
            | "parenthesized_declarator"
            | "attributed_declarator" => {
                let next = node
                    .child_by_field_name("declarator")
                    .or_else(|| node.named_child(node.named_child_count().checked_sub(1)?));
                match next {
                    Some(next) => node = next,
                    None => return node,
                }
            }
            _ => return node,
        }
    }
}

fn node_text(node: Node<'_>, source: &[u8]) -> Option<String> {
    let text = node.utf8_text(source).ok()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    None
}
