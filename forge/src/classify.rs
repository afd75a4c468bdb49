//! Intent classification: category and target track for a task.

use tracing::{info, instrument};

use crate::core::extract::{
    MIN_BLOCK_CHARS, contains_code, detect_track, extract_code, extract_structured, text_field,
};
use crate::core::types::{Category, Track};
use crate::events::EventSink;
use crate::io::gateway::{Completion, DEFAULT_TEMPERATURE};
use crate::io::prompt;

/// Resolved once per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub track: Track,
    /// Code embedded in the statement, when there was enough of it.
    pub user_code: Option<String>,
}

/// Classify `task`. A statement carrying recognizable code longer than
/// [`MIN_BLOCK_CHARS`] is always treated as [`Category::Code`], with the track
/// taken from the code rather than the classifier.
#[instrument(skip_all, fields(task_chars = task.len()))]
pub async fn classify<C: Completion>(gateway: &C, task: &str, sink: &EventSink) -> Classification {
    sink.log("Analyzing task intent...");
    let raw = gateway
        .complete(prompt::CLASSIFIER, task, true, DEFAULT_TEMPERATURE)
        .await;
    let value = extract_structured(&raw);
    let mut classification = Classification {
        category: Category::from_label(&text_field(&value, "type")),
        track: Track::from_label(&text_field(&value, "language")),
        user_code: None,
    };

    if contains_code(task) {
        let code = extract_code(task);
        if code.chars().count() > MIN_BLOCK_CHARS {
            classification.category = Category::Code;
            classification.track = detect_track(&code);
            classification.user_code = Some(code);
            sink.log("Detected user code; switching to mixed mode...");
        }
    }

    info!(
        category = %classification.category,
        track = %classification.track,
        "task classified"
    );
    sink.log(format!(
        "Mode: {} | Target language: {}",
        classification.category.as_str().to_uppercase(),
        classification.track.as_str().to_uppercase()
    ));
    classification
}
