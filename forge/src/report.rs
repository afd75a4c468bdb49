//! Terminal report for an accepted candidate.

use tracing::{instrument, warn};

use crate::core::diagram::{FAILED_DIAGRAM, mermaid_from_value};
use crate::core::extract::{extract_structured, text_field};
use crate::core::types::{Category, Verdict};
use crate::core::verdict::FINAL_SCORE;
use crate::events::Explanation;
use crate::io::gateway::{Completion, DEFAULT_TEMPERATURE};
use crate::io::prompt;

const VISUALIZER_TEMPERATURE: f32 = 0.0;
const EXPLAINER_TEMPERATURE: f32 = 0.4;

/// Replace the critique with forward-looking suggestions and mark the
/// verdict final.
#[instrument(skip_all)]
pub async fn improve<C: Completion>(gateway: &C, code: &str, mut verdict: Verdict) -> Verdict {
    let raw = gateway
        .complete(
            prompt::IMPROVER,
            &format!("Code:\n{code}"),
            true,
            DEFAULT_TEMPERATURE,
        )
        .await;
    let critique = text_field(&extract_structured(&raw), "critique");
    verdict.critique = if critique.trim().is_empty() {
        "No further suggestions.".to_string()
    } else {
        critique
    };
    verdict.score = FINAL_SCORE;
    verdict
}

/// Diagram and explanation for the final candidate, produced concurrently.
/// Each degrades to its own fallback; neither can fail the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReport {
    pub diagram: String,
    pub explanation: Explanation,
}

#[instrument(skip_all, fields(category = %category))]
pub async fn final_report<C: Completion>(
    gateway: &C,
    category: Category,
    task: &str,
    candidate_raw: &str,
    code: &str,
) -> FinalReport {
    let (diagram, explanation) = tokio::join!(
        diagram(gateway, code),
        explanation(gateway, category, task, candidate_raw)
    );
    FinalReport {
        diagram,
        explanation,
    }
}

async fn diagram<C: Completion>(gateway: &C, code: &str) -> String {
    let raw = gateway
        .complete(
            prompt::VISUALIZER,
            &format!("Code:\n{code}"),
            true,
            VISUALIZER_TEMPERATURE,
        )
        .await;
    let diagram = mermaid_from_value(&extract_structured(&raw));
    if diagram == FAILED_DIAGRAM {
        warn!("visualizer output unusable");
    }
    diagram
}

async fn explanation<C: Completion>(
    gateway: &C,
    category: Category,
    task: &str,
    candidate_raw: &str,
) -> Explanation {
    let raw = gateway
        .complete(
            prompt::explainer_system(category),
            &format!("Task: {task}\nCode: {candidate_raw}"),
            true,
            EXPLAINER_TEMPERATURE,
        )
        .await;
    Explanation::from_completion(&extract_structured(&raw), &raw)
}
