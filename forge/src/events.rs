//! Typed event stream emitted to observers of a task.
//!
//! Events serialize as `{"phase": "<name>", "content": ...}`; `iteration`
//! carries its payload under `data` instead. Consumers should ignore phases
//! they do not know.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::core::extract::text_field;
use crate::core::types::Verdict;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Event {
    Log { content: String },
    FeasibilityAlert { content: FeasibilityAlert },
    CodeChunk { content: String },
    /// Observers should discard streamed code; a regeneration follows.
    ClearCode { content: String },
    /// User-supplied code loaded as the first candidate.
    FinalCode { content: CodePayload },
    Iteration { data: IterationReport },
    FinalCodeUpdate { content: ReviewPayload },
    /// Mermaid `graph TD` source.
    Diagram { content: String },
    Explanation { content: Explanation },
    FailureReport { content: FailureReport },
    Done { content: String },
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Event::Log {
            content: message.into(),
        }
    }

    pub fn clear_code() -> Self {
        Event::ClearCode {
            content: String::new(),
        }
    }

    pub fn done() -> Self {
        Event::Done {
            content: String::new(),
        }
    }

    /// Wire name of the event's phase.
    pub fn phase(&self) -> &'static str {
        match self {
            Event::Log { .. } => "log",
            Event::FeasibilityAlert { .. } => "feasibility_alert",
            Event::CodeChunk { .. } => "code_chunk",
            Event::ClearCode { .. } => "clear_code",
            Event::FinalCode { .. } => "final_code",
            Event::Iteration { .. } => "iteration",
            Event::FinalCodeUpdate { .. } => "final_code_update",
            Event::Diagram { .. } => "diagram",
            Event::Explanation { .. } => "explanation",
            Event::FailureReport { .. } => "failure_report",
            Event::Done { .. } => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeasibilityAlert {
    pub reason: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodePayload {
    pub code: String,
}

/// One completed round: the raw candidate and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    pub round: u32,
    pub code: String,
    pub review: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub review: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub message: String,
    pub issues: String,
}

/// Dual-audience explanation of the final candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub simple: String,
    pub academic: String,
}

impl Explanation {
    /// Build from the explainer's structured output, falling back to the raw
    /// completion text when the record has neither audience.
    pub fn from_completion(value: &Value, raw: &str) -> Self {
        let simple = text_field(value, "simple");
        let academic = text_field(value, "academic");
        if simple.trim().is_empty() && academic.trim().is_empty() {
            return Self {
                simple: format!("The explanation could not be parsed; raw content follows:\n\n{raw}"),
                academic: "(parse failed)".to_string(),
            };
        }
        Self { simple, academic }
    }
}

/// Sending half of a task's event stream.
///
/// Emission never fails: once the observer hangs up, events are dropped and
/// the task runs to completion regardless.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("event observer disconnected");
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(Event::log(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_use_phase_tag_and_content() {
        let value = serde_json::to_value(Event::log("hello")).expect("serialize");
        assert_eq!(value, json!({"phase": "log", "content": "hello"}));
        let value = serde_json::to_value(Event::clear_code()).expect("serialize");
        assert_eq!(value, json!({"phase": "clear_code", "content": ""}));
    }

    #[test]
    fn iteration_uses_data_key() {
        let event = Event::Iteration {
            data: IterationReport {
                round: 2,
                code: "```cpp\nint main(){}\n```".to_string(),
                review: Verdict::failing(40, "fails case 1"),
            },
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["phase"], "iteration");
        assert_eq!(value["data"]["round"], 2);
        assert_eq!(value["data"]["review"]["score"], 40);
        assert_eq!(value["data"]["review"]["pass"], false);
        assert_eq!(event.phase(), "iteration");
    }

    #[test]
    fn phase_matches_serialized_tag() {
        let events = [
            Event::FeasibilityAlert {
                content: FeasibilityAlert {
                    reason: "exponential".to_string(),
                    recommendation: "use dp".to_string(),
                },
            },
            Event::FailureReport {
                content: FailureReport {
                    message: "m".to_string(),
                    issues: "i".to_string(),
                },
            },
            Event::done(),
        ];
        for event in events {
            let value = serde_json::to_value(&event).expect("serialize");
            assert_eq!(value["phase"], event.phase());
        }
    }

    #[test]
    fn explanation_falls_back_to_raw_text() {
        let parsed = Explanation::from_completion(&json!({"simple": "a", "academic": "b"}), "");
        assert_eq!(parsed.simple, "a");
        let fallback = Explanation::from_completion(&json!({"raw": "oops"}), "oops");
        assert!(fallback.simple.ends_with("oops"));
        assert_eq!(fallback.academic, "(parse failed)");
    }

    #[test]
    fn sink_survives_dropped_observer() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        EventSink::new(tx).log("nobody listening");
    }
}
