//! Prompt templates for every completion the orchestrator issues.
//!
//! Fixed system prompts are plain constants. Prompts that depend on the
//! session (category, track, approved design, round feedback) are minijinja
//! templates rendered on demand.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{Blueprint, Category, Track};

pub const CLASSIFIER: &str = include_str!("prompts/classifier.md");
pub const TEST_EXTRACTOR: &str = include_str!("prompts/test_extractor.md");
pub const REVERSE_ARCHITECT: &str = include_str!("prompts/reverse_architect.md");
pub const FEASIBILITY: &str = include_str!("prompts/feasibility.md");
pub const ARCHITECT_REVIEWER: &str = include_str!("prompts/architect_reviewer.md");
pub const DEBUGGER: &str = include_str!("prompts/debugger.md");
pub const STRICT_AUDITOR: &str = include_str!("prompts/auditor_strict.md");
pub const LENIENT_AUDITOR: &str = include_str!("prompts/auditor_lenient.md");
pub const IMPROVER: &str = include_str!("prompts/improver.md");
pub const VISUALIZER: &str = include_str!("prompts/visualizer.md");
const TASK_EXPLAINER: &str = include_str!("prompts/explainer_task.md");
const ALGORITHM_EXPLAINER: &str = include_str!("prompts/explainer_algorithm.md");

/// Corrective instruction appended when a generation contained no code.
pub const MISSING_CODE_CORRECTION: &str =
    "No code block was detected in your reply. Output exactly one ```cpp or ```python block.";

const ARCHITECT_TEMPLATE: &str = include_str!("prompts/architect.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const REQUEST_TEMPLATE: &str = include_str!("prompts/request.md");
const FEASIBILITY_INPUT_TEMPLATE: &str = include_str!("prompts/feasibility_input.md");
const REVIEW_INPUT_TEMPLATE: &str = include_str!("prompts/review_input.md");
const DEBUG_INPUT_TEMPLATE: &str = include_str!("prompts/debug_input.md");
const AUDIT_INPUT_TEMPLATE: &str = include_str!("prompts/audit_input.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");

static TEMPLATES: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    for (name, source) in [
        ("architect", ARCHITECT_TEMPLATE),
        ("coder", CODER_TEMPLATE),
        ("request", REQUEST_TEMPLATE),
        ("feasibility_input", FEASIBILITY_INPUT_TEMPLATE),
        ("review_input", REVIEW_INPUT_TEMPLATE),
        ("debug_input", DEBUG_INPUT_TEMPLATE),
        ("audit_input", AUDIT_INPUT_TEMPLATE),
        ("refine", REFINE_TEMPLATE),
    ] {
        env.add_template(name, source)
            .expect("prompt template should be valid");
    }
    env
});

fn render<S: Serialize>(name: &str, ctx: S) -> String {
    TEMPLATES
        .get_template(name)
        .and_then(|template| template.render(ctx))
        .expect("prompt template rendering should not fail")
        .trim()
        .to_string()
}

fn design_text(blueprint: Option<&Blueprint>) -> Option<String> {
    blueprint.and_then(|b| serde_json::to_string_pretty(b).ok())
}

fn non_empty(text: &str) -> Option<&str> {
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

/// Forward planner system prompt, optionally bound to a recommendation from a
/// rejected design.
pub fn architect_system(recommendation: Option<&str>) -> String {
    render(
        "architect",
        context! { recommendation => recommendation.and_then(non_empty) },
    )
}

/// Generator system prompt. Open-ended tasks get interactive mode; the other
/// categories get the silent I/O contract.
pub fn coder_system(category: Category, track: Track, blueprint: Option<&Blueprint>) -> String {
    let blueprint = blueprint.map(|b| {
        context! {
            algorithm => b.algorithm_label(),
            data_structures => non_empty(&b.data_structures).unwrap_or("unspecified"),
            summary => non_empty(&b.summary).unwrap_or("unspecified"),
        }
    });
    render(
        "coder",
        context! {
            track => track.as_str(),
            interactive => !category.requires_io_contract(),
            blueprint => blueprint,
        },
    )
}

/// Explainer system prompt for the terminal report.
pub fn explainer_system(category: Category) -> &'static str {
    match category {
        Category::Task => TASK_EXPLAINER,
        Category::Problem | Category::Code => ALGORITHM_EXPLAINER,
    }
}

/// First user turn of the transcript.
pub fn generation_request(task: &str, user_code: bool, blueprint: Option<&Blueprint>) -> String {
    render(
        "request",
        context! {
            task => task.trim(),
            user_code => user_code,
            design => design_text(blueprint),
        },
    )
}

pub fn feasibility_input(task: &str, design: &str) -> String {
    render(
        "feasibility_input",
        context! { task => task.trim(), design => design.trim() },
    )
}

pub fn review_input(task: &str, proposal: &str) -> String {
    render(
        "review_input",
        context! { task => task.trim(), proposal => proposal.trim() },
    )
}

pub fn debug_input(code: &str, report: &str, task: &str) -> String {
    render(
        "debug_input",
        context! { code => code, report => report.trim(), task => task.trim() },
    )
}

pub fn audit_input(task: &str, blueprint: Option<&Blueprint>, code: &str) -> String {
    render(
        "audit_input",
        context! { task => task.trim(), design => design_text(blueprint), code => code },
    )
}

/// Inputs for the refinement instruction appended after a rejected round.
#[derive(Debug, Clone)]
pub struct RefineInputs<'a> {
    /// Style-polish request instead of a fix request.
    pub polish: bool,
    pub critique: &'a str,
    pub report: &'a str,
    pub track: Track,
    pub blueprint: Option<&'a Blueprint>,
    /// Lock violation text when the architecture lock fired this round.
    pub lock_warning: Option<&'a str>,
}

pub fn refine_instruction(inputs: &RefineInputs<'_>) -> String {
    render(
        "refine",
        context! {
            polish => inputs.polish,
            critique => inputs.critique.trim(),
            report => inputs.report.trim(),
            track => inputs.track.as_str(),
            algorithm => inputs.blueprint.map(Blueprint::algorithm_label),
            lock_warning => inputs.lock_warning.and_then(non_empty),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint() -> Blueprint {
        Blueprint {
            algorithm: "prefix sums".to_string(),
            data_structures: "vector<long long>".to_string(),
            summary: "accumulate then answer queries".to_string(),
            ..Blueprint::default()
        }
    }

    #[test]
    fn coder_prompt_switches_io_mode_by_category() {
        let task = coder_system(Category::Task, Track::Python, None);
        assert!(task.contains("Interactive mode"));
        assert!(task.contains("Python 3"));
        assert!(!task.contains("Silent mode"));

        let problem = coder_system(Category::Problem, Track::Cpp, None);
        assert!(problem.contains("Silent mode"));
        assert!(problem.contains("C++"));
        assert!(!problem.contains("Architecture lock"));
    }

    #[test]
    fn coder_prompt_embeds_blueprint() {
        let prompt = coder_system(Category::Problem, Track::Cpp, Some(&blueprint()));
        assert!(prompt.contains("Algorithm: prefix sums"));
        assert!(prompt.contains("Do not replace the core architecture"));
    }

    #[test]
    fn architect_prompt_carries_recommendation() {
        let plain = architect_system(None);
        assert!(!plain.contains("Overriding constraint"));
        let seeded = architect_system(Some("use dynamic programming"));
        assert!(seeded.contains("Overriding constraint"));
        assert!(seeded.ends_with("use dynamic programming"));
        assert_eq!(architect_system(Some("  ")), plain);
    }

    #[test]
    fn refine_instruction_appends_alerts() {
        let bp = blueprint();
        let text = refine_instruction(&RefineInputs {
            polish: false,
            critique: "prints a label",
            report: "[Case 1 Fail]",
            track: Track::Cpp,
            blueprint: Some(&bp),
            lock_warning: Some("core declarations removed: solve"),
        });
        assert!(text.starts_with("Issues:\nprints a label"));
        assert!(text.contains("Keep using cpp."));
        assert!(text.contains("do not abandon the prefix sums design"));
        assert!(text.contains("core declarations removed: solve"));
    }

    #[test]
    fn polish_instruction_does_not_mention_report() {
        let text = refine_instruction(&RefineInputs {
            polish: true,
            critique: "fine",
            report: "all cases passed",
            track: Track::Python,
            blueprint: None,
            lock_warning: None,
        });
        assert!(text.contains("polish its style"));
        assert!(!text.contains("all cases passed"));
        assert!(!text.contains("Alert"));
    }

    #[test]
    fn polish_instruction_limits_renaming_to_variables() {
        let text = refine_instruction(&RefineInputs {
            polish: true,
            critique: "fine",
            report: "",
            track: Track::Cpp,
            blueprint: None,
            lock_warning: None,
        });
        assert!(text.contains("descriptive variable names"));
        assert!(text.contains("Keep every function and type name"));
        assert!(!text.contains("Improve the structure"));
    }

    #[test]
    fn generation_request_includes_design_only_when_approved() {
        let with = generation_request("sum numbers", false, Some(&blueprint()));
        assert!(with.starts_with("Requirement: sum numbers"));
        assert!(with.contains("\"algorithm\": \"prefix sums\""));
        let without = generation_request("sum numbers", false, None);
        assert_eq!(without, "Requirement: sum numbers");
        let user = generation_request("fix this", true, None);
        assert!(user.contains("including my code"));
    }

    #[test]
    fn explainer_prompt_depends_on_category() {
        assert!(explainer_system(Category::Task).contains("architecture documents"));
        assert!(explainer_system(Category::Problem).contains("teach algorithms"));
        assert_eq!(
            explainer_system(Category::Code),
            explainer_system(Category::Problem)
        );
    }

    #[test]
    fn audit_input_marks_unconstrained_design() {
        let text = audit_input("task", None, "int main() {}");
        assert!(text.contains("None (unconstrained)."));
        assert!(text.contains("int main() {}"));
    }
}
