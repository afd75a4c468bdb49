//! Side-effecting adapters: completion service, subprocesses, prompts, config.

pub mod config;
pub mod gateway;
pub mod harness;
pub mod process;
pub mod prompt;
