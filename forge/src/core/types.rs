//! Shared deterministic types for the synthesis loop.
//!
//! These types define stable contracts between stages. They carry no I/O and
//! serialize to the shapes the completion service and event observers expect.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::extract::extract_code;

/// What kind of ask the task is. Drives I/O strictness, audit track and
/// whether test cases are resolved at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Open-ended engineering ask ("write a snake game").
    #[default]
    Task,
    /// Competitive-programming statement with a strict I/O contract.
    Problem,
    /// User supplied code that should be fixed.
    Code,
}

impl Category {
    /// Parse the classifier's `type` field, defaulting to [`Category::Task`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "problem" => Category::Problem,
            "code" => Category::Code,
            _ => Category::Task,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Task => "task",
            Category::Problem => "problem",
            Category::Code => "code",
        }
    }

    /// Whether candidates must honor a verifiable I/O contract.
    pub fn requires_io_contract(self) -> bool {
        !matches!(self, Category::Task)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output language a candidate is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    /// Compiled, statically typed track (C++).
    #[default]
    Cpp,
    /// Interpreted, dynamically typed track (Python 3).
    Python,
}

impl Track {
    /// Parse the classifier's `language` field, defaulting to [`Track::Cpp`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Track::Python,
            _ => Track::Cpp,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Track::Cpp => "cpp",
            Track::Python => "python",
        }
    }

    /// Source file extension used when materializing a candidate.
    pub fn extension(self) -> &'static str {
        match self {
            Track::Cpp => "cpp",
            Track::Python => "py",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approved algorithmic design injected into every generation prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Blueprint {
    pub algorithm: String,
    pub data_structures: String,
    #[serde(alias = "headers")]
    pub imports: String,
    pub complexity: String,
    #[serde(alias = "blueprint")]
    pub summary: String,
}

impl Blueprint {
    /// Build a blueprint from a structured completion, tolerating non-string
    /// members. Returns `None` when no field carries any content.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let field = |keys: &[&str]| -> String {
            keys.iter()
                .find_map(|key| value.get(*key))
                .map(value_to_text)
                .unwrap_or_default()
        };
        let blueprint = Self {
            algorithm: field(&["algorithm"]),
            data_structures: field(&["data_structures"]),
            imports: field(&["headers", "imports"]),
            complexity: field(&["complexity"]),
            summary: field(&["blueprint", "summary"]),
        };
        if blueprint.is_empty() {
            None
        } else {
            Some(blueprint)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.algorithm.trim().is_empty()
            && self.data_structures.trim().is_empty()
            && self.imports.trim().is_empty()
            && self.complexity.trim().is_empty()
            && self.summary.trim().is_empty()
    }

    /// Algorithm label for log lines, or a placeholder when unspecified.
    pub fn algorithm_label(&self) -> &str {
        if self.algorithm.trim().is_empty() {
            "unspecified"
        } else {
            self.algorithm.trim()
        }
    }
}

/// Render an arbitrary JSON value as prompt text.
pub fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One input/expected-output pair. Order-significant, not deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    #[serde(rename = "output")]
    pub expected_output: String,
}

/// Normalized outcome of a round's audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub score: u32,
    pub pass: bool,
    pub critique: String,
}

impl Verdict {
    pub fn failing(score: u32, critique: impl Into<String>) -> Self {
        Self {
            score,
            pass: false,
            critique: critique.into(),
        }
    }
}

/// Output of running a candidate against one input. Transient per round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Normalized standard output.
    pub stdout: String,
    /// Normalized standard error, or a harness diagnostic
    /// (`Compile Error: ...`, `Timeout`, spawn failures).
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn diagnostic(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout() -> Self {
        Self {
            stdout: String::new(),
            stderr: "Timeout".to_string(),
            timed_out: true,
        }
    }

    pub fn is_error(&self) -> bool {
        self.timed_out || !self.stderr.is_empty()
    }
}

/// Speaker of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged message in the conversational context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only conversational context shared by every generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// The current working code revision plus the raw text it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    /// Raw generation text (may contain prose and fences).
    pub raw: String,
    /// Code extracted from `raw`; empty when nothing looked like code.
    pub code: String,
}

impl Candidate {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let code = extract_code(&raw);
        Self { raw, code }
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }
}
