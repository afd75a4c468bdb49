//! Iterative synthesis-and-verification orchestrator.
//!
//! A natural-language task (optionally carrying user code) is classified,
//! planned into an approved design, generated by a streaming completion
//! service, executed against test cases in a sandbox, audited, and refined
//! for a bounded number of rounds. Progress is reported as a typed event
//! stream. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, normalization,
//!   verdict sanitation, the architecture lock, diagram rendering).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (completion service, process
//!   execution, configuration, prompt rendering). Behind traits so tests can
//!   script them.
//!
//! Stage modules ([`classify`], [`cases`], [`planner`], [`audit`], [`report`])
//! combine core logic with I/O; [`orchestrator`] sequences them.

pub mod audit;
pub mod cases;
pub mod classify;
pub mod core;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod planner;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
