//! Stable exit codes for forge CLI commands.

/// Command succeeded; for `solve`, a candidate was accepted.
pub const OK: i32 = 0;
/// Command failed due to invalid config, unreadable input or other errors.
pub const INVALID: i32 = 1;
/// `forge solve` exhausted its rounds and ended with a failure report.
pub const UNSOLVED: i32 = 2;
