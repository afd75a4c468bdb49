//! Deterministic, pure logic shared by the synthesis loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and JSON values and return deterministic outputs suitable for tests.

pub mod cases;
pub mod diagram;
pub mod extract;
pub mod lock;
pub mod normalize;
pub mod types;
pub mod verdict;
