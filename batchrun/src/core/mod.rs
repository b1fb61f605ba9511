//! Deterministic, pure logic for a batch run's outcome.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod failure;
pub mod outcome;
pub mod resolver;
pub mod statistics;
pub mod text;
pub mod types;
