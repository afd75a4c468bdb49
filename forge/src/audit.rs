//! Audit engine: scoring policies and the debugging pass.

use tracing::{debug, instrument};

use crate::core::extract::extract_structured;
use crate::core::types::{Blueprint, Category, Verdict};
use crate::core::verdict::{apply_convergence, debug_verdict, is_terse, sanitize_verdict};
use crate::io::gateway::{Completion, DEFAULT_TEMPERATURE};
use crate::io::prompt;

/// Scoring policy, selected by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditPolicy {
    /// Complexity compliance and a silent-output contract. Only reached once
    /// every test case has passed.
    Strict,
    /// Modularity, naming, UX clarity and robustness. Interactive prompts are
    /// rewarded rather than penalized.
    Lenient,
}

impl AuditPolicy {
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Task => AuditPolicy::Lenient,
            Category::Problem | Category::Code => AuditPolicy::Strict,
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            AuditPolicy::Strict => prompt::STRICT_AUDITOR,
            AuditPolicy::Lenient => prompt::LENIENT_AUDITOR,
        }
    }
}

/// An audited round: the final verdict plus the score before escalation,
/// which the next round compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOutcome {
    pub verdict: Verdict,
    pub raw_score: u32,
}

/// Audit code whose execution passed.
///
/// The verdict is forced to `pass = true` (execution already vouched for
/// correctness) and anti-stagnation escalation is applied against the
/// previous audited round's raw score.
#[instrument(skip_all, fields(policy = ?policy, previous_score))]
pub async fn audit<C: Completion>(
    gateway: &C,
    policy: AuditPolicy,
    task: &str,
    blueprint: Option<&Blueprint>,
    code: &str,
    previous_score: Option<u32>,
) -> AuditOutcome {
    let raw = gateway
        .complete(
            policy.system_prompt(),
            &prompt::audit_input(task, blueprint, code),
            true,
            DEFAULT_TEMPERATURE,
        )
        .await;
    let value = extract_structured(&raw);
    let mut verdict = sanitize_verdict(&value, &raw);
    verdict.pass = true;
    let raw_score = verdict.score;
    let verdict = apply_convergence(verdict, is_terse(&value), previous_score);
    debug!(raw_score, score = verdict.score, "audit scored");
    AuditOutcome { verdict, raw_score }
}

/// Explain a failed execution. Always yields a failing verdict.
#[instrument(skip_all)]
pub async fn diagnose<C: Completion>(gateway: &C, code: &str, report: &str, task: &str) -> Verdict {
    let raw = gateway
        .complete(
            prompt::DEBUGGER,
            &prompt::debug_input(code, report, task),
            true,
            DEFAULT_TEMPERATURE,
        )
        .await;
    debug_verdict(&extract_structured(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::verdict::{CONVERGED_SCORE, DEBUG_SCORE};
    use crate::test_support::ScriptedGateway;

    #[test]
    fn policy_follows_category() {
        assert_eq!(AuditPolicy::for_category(Category::Task), AuditPolicy::Lenient);
        assert_eq!(AuditPolicy::for_category(Category::Problem), AuditPolicy::Strict);
        assert_eq!(AuditPolicy::for_category(Category::Code), AuditPolicy::Strict);
    }

    #[tokio::test]
    async fn strict_policy_uses_judge_prompt_and_forces_pass() {
        let gateway = ScriptedGateway::new().with_completion(
            prompt::STRICT_AUDITOR,
            r#"{"score": 88, "pass": false, "critique": "Reading input with cin is slow for 10^6 values."}"#,
        );
        let outcome = audit(&gateway, AuditPolicy::Strict, "task", None, "code", None).await;
        assert_eq!(outcome.raw_score, 88);
        assert_eq!(outcome.verdict.score, 88);
        assert!(outcome.verdict.pass);
        assert!(gateway.calls_matching(prompt::LENIENT_AUDITOR).is_empty());
    }

    #[tokio::test]
    async fn repeated_score_converges_but_raw_score_is_kept() {
        let gateway = ScriptedGateway::new().with_completion(
            prompt::LENIENT_AUDITOR,
            r#"{"score": 86, "critique": "Consider splitting the render loop into helpers."}"#,
        );
        let outcome = audit(&gateway, AuditPolicy::Lenient, "task", None, "code", Some(86)).await;
        assert_eq!(outcome.verdict.score, CONVERGED_SCORE);
        assert_eq!(outcome.raw_score, 86);
    }

    #[tokio::test]
    async fn unparsable_audit_scores_zero() {
        let gateway = ScriptedGateway::new()
            .with_completion(prompt::STRICT_AUDITOR, "the code looks fine to me");
        let outcome = audit(&gateway, AuditPolicy::Strict, "task", None, "code", None).await;
        assert_eq!(outcome.verdict.score, 0);
        assert!(outcome.verdict.critique.starts_with("parse error"));
    }

    #[tokio::test]
    async fn diagnosis_is_a_failing_verdict() {
        let gateway = ScriptedGateway::new().with_completion(
            prompt::DEBUGGER,
            r#"{"analysis": "prints a 'Sum:' label", "suggestion": "print the bare number"}"#,
        );
        let verdict = diagnose(&gateway, "code", "[Case 1 Fail]", "task").await;
        assert_eq!(verdict.score, DEBUG_SCORE);
        assert!(!verdict.pass);
        assert!(verdict.critique.contains("bare number"));
    }
}
