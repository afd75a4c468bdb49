//! Test cases: resolved once per task, replayed against every candidate.

use tracing::{debug, instrument};

use crate::core::cases::parse_test_cases;
use crate::core::extract::extract_structured;
use crate::core::normalize::{normalize_output, truncate_chars};
use crate::core::types::{Category, TestCase, Track};
use crate::events::EventSink;
use crate::io::gateway::{Completion, DEFAULT_TEMPERATURE};
use crate::io::harness::Sandbox;
use crate::io::prompt;

/// Expected/actual excerpts in a failure report are cut to this many chars.
const REPORT_EXCERPT_CHARS: usize = 150;

/// Extract (or synthesize) test cases for categories with an I/O contract.
///
/// Open-ended tasks get none. An empty result is not an error: execution is
/// skipped and the audit works from the code alone.
#[instrument(skip_all, fields(category = %category))]
pub async fn resolve_test_cases<C: Completion>(
    gateway: &C,
    task: &str,
    category: Category,
    sink: &EventSink,
) -> Vec<TestCase> {
    if !category.requires_io_contract() {
        return Vec::new();
    }
    let raw = gateway
        .complete(prompt::TEST_EXTRACTOR, task, true, DEFAULT_TEMPERATURE)
        .await;
    let cases = parse_test_cases(&extract_structured(&raw));
    debug!(count = cases.len(), "test cases resolved");
    if cases.is_empty() {
        sink.log("No usable test cases; execution will be skipped.");
    } else {
        sink.log(format!("Extracted {} test cases.", cases.len()));
    }
    cases
}

/// Outcome of replaying every case against one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub passed: bool,
    pub report: String,
}

/// Run `code` against each case in order, comparing normalized output.
///
/// A case fails on any diagnostic (compile error, runtime stderr, timeout) or
/// on an output mismatch. Every case runs even after a failure so the report
/// covers them all.
#[instrument(skip_all, fields(track = %track, cases = cases.len()))]
pub async fn run_test_cases<S: Sandbox>(
    sandbox: &S,
    code: &str,
    track: Track,
    cases: &[TestCase],
    category: Category,
    sink: &EventSink,
) -> RunOutcome {
    if !category.requires_io_contract() {
        return RunOutcome {
            passed: true,
            report: "Task mode: automatic tests skipped.".to_string(),
        };
    }
    if cases.is_empty() {
        return RunOutcome {
            passed: true,
            report: "No test cases.".to_string(),
        };
    }

    let mut passed = true;
    let mut report = String::new();
    for (idx, case) in cases.iter().enumerate() {
        let number = idx + 1;
        let expected = normalize_output(&case.expected_output);
        let result = sandbox.run(code, track, &case.input).await;
        if result.is_error() {
            passed = false;
            report.push_str(&format!("[Case {number} Error] {}\n", result.stderr));
            sink.log(format!("Case {number} errored"));
        } else if result.stdout != expected {
            passed = false;
            report.push_str(&format!(
                "[Case {number} Fail]\nExpected:\n{}\nActual:\n{}\n",
                truncate_chars(&expected, REPORT_EXCERPT_CHARS),
                truncate_chars(&result.stdout, REPORT_EXCERPT_CHARS)
            ));
            sink.log(format!("Case {number} output mismatch"));
        } else {
            sink.log(format!("Case {number} passed"));
        }
    }
    if passed {
        report = format!("All {} test cases passed.", cases.len());
    }
    RunOutcome { passed, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExecutionResult;
    use crate::test_support::{ScriptedGateway, ScriptedSandbox};

    fn sink() -> EventSink {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        EventSink::new(tx)
    }

    fn sum_case() -> Vec<TestCase> {
        vec![TestCase {
            input: "3\n1 2 3".to_string(),
            expected_output: "6".to_string(),
        }]
    }

    #[tokio::test]
    async fn open_ended_tasks_skip_extraction() {
        let gateway = ScriptedGateway::new();
        let cases = resolve_test_cases(&gateway, "make a game", Category::Task, &sink()).await;
        assert!(cases.is_empty());
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn keyed_container_is_unwrapped() {
        let gateway = ScriptedGateway::new().with_completion(
            prompt::TEST_EXTRACTOR,
            r#"```json
{"cases": [{"input": "3\n1 2 3", "output": "6"}, {"input": "1\n5", "output": "5"}]}
```"#,
        );
        let cases = resolve_test_cases(&gateway, "sum", Category::Problem, &sink()).await;
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0], sum_case()[0]);
    }

    #[tokio::test]
    async fn exact_output_passes() {
        let sandbox = ScriptedSandbox::new().with_stdout("3\n1 2 3", "6");
        let outcome =
            run_test_cases(&sandbox, "code", Track::Cpp, &sum_case(), Category::Problem, &sink()).await;
        assert!(outcome.passed, "{}", outcome.report);
    }

    #[tokio::test]
    async fn trailing_blank_line_in_expected_output_still_passes() {
        let cases = vec![TestCase {
            input: "3\n1 2 3".to_string(),
            expected_output: "6\n\n".to_string(),
        }];
        let sandbox = ScriptedSandbox::new().with_stdout("3\n1 2 3", "6");
        let outcome =
            run_test_cases(&sandbox, "code", Track::Cpp, &cases, Category::Problem, &sink()).await;
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn labelled_output_fails_with_excerpt() {
        let sandbox = ScriptedSandbox::new().with_stdout("3\n1 2 3", "Sum: 6");
        let outcome =
            run_test_cases(&sandbox, "code", Track::Cpp, &sum_case(), Category::Problem, &sink()).await;
        assert!(!outcome.passed);
        assert_eq!(
            outcome.report,
            "[Case 1 Fail]\nExpected:\n6\nActual:\nSum: 6\n"
        );
    }

    #[tokio::test]
    async fn diagnostics_are_reported_per_case() {
        let sandbox = ScriptedSandbox::new().with_result(
            "3\n1 2 3",
            ExecutionResult::diagnostic("Compile Error: expected ';'"),
        );
        let outcome =
            run_test_cases(&sandbox, "code", Track::Cpp, &sum_case(), Category::Code, &sink()).await;
        assert!(!outcome.passed);
        assert!(outcome.report.starts_with("[Case 1 Error] Compile Error"));
    }

    #[tokio::test]
    async fn task_category_never_executes() {
        let sandbox = ScriptedSandbox::new();
        let outcome =
            run_test_cases(&sandbox, "code", Track::Python, &sum_case(), Category::Task, &sink()).await;
        assert!(outcome.passed);
        assert!(sandbox.runs().is_empty());
    }
}
