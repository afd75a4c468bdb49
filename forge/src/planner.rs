//! Design and feasibility planning.
//!
//! Reverse mode infers the design of user-supplied code and gates it on a
//! feasibility check. Forward mode proposes a design and submits it to an
//! independent reviewer, a bounded number of times. The approved design
//! becomes the [`Blueprint`] every generation prompt is held to.

use tracing::{info, instrument, warn};

use crate::core::extract::{bool_field, extract_structured, text_field};
use crate::core::types::Blueprint;
use crate::events::{Event, EventSink, FeasibilityAlert};
use crate::io::gateway::{Completion, DEFAULT_TEMPERATURE};
use crate::io::prompt;

/// Result of planning: the design to enforce and the user code that survives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub blueprint: Option<Blueprint>,
    /// User code to start from; cleared when feasibility rejected it.
    pub user_code: Option<String>,
}

/// Verdict of the reverse-mode feasibility gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feasibility {
    /// The user's approach stands; carries the inferred design when any.
    Approved(Option<Blueprint>),
    Rejected {
        reason: String,
        recommendation: String,
    },
}

/// Plan a task. User code goes through reverse mode first; forward mode runs
/// whenever no usable user code remains, seeded with the rejection's
/// recommendation.
pub async fn plan<C: Completion>(
    gateway: &C,
    task: &str,
    user_code: Option<String>,
    max_design_attempts: u32,
    sink: &EventSink,
) -> Plan {
    let mut recommendation = None;
    if let Some(code) = user_code {
        match reverse(gateway, task, &code, sink).await {
            Feasibility::Approved(blueprint) => {
                return Plan {
                    blueprint,
                    user_code: Some(code),
                };
            }
            Feasibility::Rejected {
                recommendation: rec,
                ..
            } => {
                recommendation = Some(rec).filter(|r| !r.trim().is_empty());
            }
        }
    }

    let blueprint = forward(
        gateway,
        task,
        recommendation.as_deref(),
        max_design_attempts,
        sink,
    )
    .await;
    Plan {
        blueprint,
        user_code: None,
    }
}

/// Infer the design of `code` and check it against the task.
///
/// A feasibility reply without a verdict (service failure, unparsable text)
/// keeps the user's approach: only an explicit rejection discards user code.
#[instrument(skip_all, fields(code_chars = code.len()))]
pub async fn reverse<C: Completion>(
    gateway: &C,
    task: &str,
    code: &str,
    sink: &EventSink,
) -> Feasibility {
    sink.log("Analyzing the architecture of the user code...");
    let inferred_raw = gateway
        .complete(prompt::REVERSE_ARCHITECT, code, true, DEFAULT_TEMPERATURE)
        .await;
    let inferred = Blueprint::from_value(&extract_structured(&inferred_raw));

    sink.log("Assessing algorithmic feasibility...");
    let verdict_raw = gateway
        .complete(
            prompt::FEASIBILITY,
            &prompt::feasibility_input(task, &inferred_raw),
            true,
            DEFAULT_TEMPERATURE,
        )
        .await;
    let verdict = extract_structured(&verdict_raw);

    if verdict.get("pass").is_none() {
        warn!("feasibility verdict missing; keeping user approach");
        sink.log("Feasibility check unavailable; keeping the submitted approach.");
        return Feasibility::Approved(inferred);
    }
    if bool_field(&verdict, "pass") {
        let label = inferred
            .as_ref()
            .map(Blueprint::algorithm_label)
            .unwrap_or("unspecified");
        sink.log(format!("Approach is feasible: {label}"));
        return Feasibility::Approved(inferred);
    }

    let reason = text_field(&verdict, "reason");
    let recommendation = text_field(&verdict, "recommendation");
    info!(%reason, %recommendation, "user approach rejected");
    sink.log(format!("Approach rejected: {reason}"));
    sink.emit(Event::FeasibilityAlert {
        content: FeasibilityAlert {
            reason: reason.clone(),
            recommendation: recommendation.clone(),
        },
    });
    sink.log(format!("Strategic pivot: {recommendation}"));
    Feasibility::Rejected {
        reason,
        recommendation,
    }
}

/// Propose designs until a reviewer approves one or `max_attempts` runs out.
#[instrument(skip_all, fields(seeded = recommendation.is_some(), max_attempts))]
pub async fn forward<C: Completion>(
    gateway: &C,
    task: &str,
    recommendation: Option<&str>,
    max_attempts: u32,
    sink: &EventSink,
) -> Option<Blueprint> {
    sink.log("Planning the architecture...");
    let system_prompt = prompt::architect_system(recommendation);
    for attempt in 1..=max_attempts {
        let proposal_raw = gateway
            .complete(&system_prompt, task, true, DEFAULT_TEMPERATURE)
            .await;
        let proposal = Blueprint::from_value(&extract_structured(&proposal_raw));
        let Some(proposal) = proposal else {
            warn!(attempt, "empty design proposal");
            continue;
        };

        let review_raw = gateway
            .complete(
                prompt::ARCHITECT_REVIEWER,
                &prompt::review_input(task, &proposal_raw),
                true,
                DEFAULT_TEMPERATURE,
            )
            .await;
        let review = extract_structured(&review_raw);
        if bool_field(&review, "pass") {
            sink.log(format!(
                "Architecture locked: {}",
                proposal.algorithm_label()
            ));
            return Some(proposal);
        }
        info!(attempt, critique = %text_field(&review, "critique"), "design rejected");
    }
    sink.log("No design was approved; generating without a blueprint.");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGateway;

    const ARCHITECT_NEEDLE: &str = "You are a senior system architect.";
    const DESIGN: &str = r#"{"algorithm": "dynamic programming", "data_structures": "array", "headers": "<vector>", "complexity": "O(n)", "blueprint": "bottom-up table"}"#;

    fn sink() -> (EventSink, tokio::sync::mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (EventSink::new(tx), rx)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn feasible_user_code_keeps_inferred_design() {
        let gateway = ScriptedGateway::new()
            .with_completion(prompt::REVERSE_ARCHITECT, DESIGN)
            .with_completion(prompt::FEASIBILITY, r#"{"pass": true, "reason": "fine"}"#);
        let (sink, _rx) = sink();
        let plan = plan(&gateway, "task", Some("int main(){}".to_string()), 2, &sink).await;
        assert_eq!(plan.user_code.as_deref(), Some("int main(){}"));
        assert_eq!(
            plan.blueprint.map(|b| b.algorithm),
            Some("dynamic programming".to_string())
        );
        assert!(gateway.calls_matching(ARCHITECT_NEEDLE).is_empty());
        gateway.assert_drained();
    }

    #[tokio::test]
    async fn rejection_seeds_forward_planner_with_recommendation() {
        let gateway = ScriptedGateway::new()
            .with_completion(
                prompt::REVERSE_ARCHITECT,
                r#"{"algorithm": "naive recursion", "complexity": "O(2^n)"}"#,
            )
            .with_completion(
                prompt::FEASIBILITY,
                r#"{"pass": false, "reason": "exponential for n = 10^5", "recommendation": "use dynamic programming"}"#,
            )
            .with_completion(ARCHITECT_NEEDLE, DESIGN)
            .with_completion(prompt::ARCHITECT_REVIEWER, r#"{"pass": true, "critique": "ok"}"#);
        let (sink, mut rx) = sink();
        let plan = plan(&gateway, "fib up to 1e5", Some("int fib(int n){...}".to_string()), 2, &sink).await;

        assert!(plan.user_code.is_none());
        assert!(plan.blueprint.is_some());
        let architect_calls = gateway.calls_matching(ARCHITECT_NEEDLE);
        assert_eq!(architect_calls.len(), 1);
        assert!(architect_calls[0].system_prompt.contains("use dynamic programming"));

        let alert = drain(&mut rx).into_iter().find_map(|event| match event {
            Event::FeasibilityAlert { content } => Some(content),
            _ => None,
        });
        let alert = alert.expect("feasibility alert emitted");
        assert_eq!(alert.recommendation, "use dynamic programming");
        gateway.assert_drained();
    }

    #[tokio::test]
    async fn missing_feasibility_verdict_keeps_user_code() {
        let gateway = ScriptedGateway::new().with_completion(prompt::REVERSE_ARCHITECT, DESIGN);
        let (sink, _rx) = sink();
        let plan = plan(&gateway, "task", Some("code".to_string()), 2, &sink).await;
        assert_eq!(plan.user_code.as_deref(), Some("code"));
    }

    #[tokio::test]
    async fn forward_mode_gives_up_after_bound() {
        let gateway = ScriptedGateway::new()
            .with_completion(ARCHITECT_NEEDLE, DESIGN)
            .with_completion(ARCHITECT_NEEDLE, DESIGN)
            .with_completion(prompt::ARCHITECT_REVIEWER, r#"{"pass": false, "critique": "vague"}"#)
            .with_completion(prompt::ARCHITECT_REVIEWER, r#"{"pass": false, "critique": "still vague"}"#);
        let (sink, _rx) = sink();
        let blueprint = forward(&gateway, "task", None, 2, &sink).await;
        assert!(blueprint.is_none());
        assert_eq!(gateway.calls_matching(ARCHITECT_NEEDLE).len(), 2);
        assert_eq!(gateway.calls_matching(prompt::ARCHITECT_REVIEWER).len(), 2);
        gateway.assert_drained();
    }

    #[tokio::test]
    async fn second_proposal_can_be_approved() {
        let gateway = ScriptedGateway::new()
            .with_completion(ARCHITECT_NEEDLE, r#"{"algorithm": "greedy"}"#)
            .with_completion(ARCHITECT_NEEDLE, DESIGN)
            .with_completion(prompt::ARCHITECT_REVIEWER, r#"{"pass": false}"#)
            .with_completion(prompt::ARCHITECT_REVIEWER, r#"{"pass": "true"}"#);
        let (sink, _rx) = sink();
        let blueprint = forward(&gateway, "task", None, 2, &sink).await;
        assert_eq!(
            blueprint.map(|b| b.algorithm),
            Some("dynamic programming".to_string())
        );
        gateway.assert_drained();
    }
}
