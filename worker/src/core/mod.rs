//! Deterministic, pure logic shared by the worker.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and paths-as-values and return deterministic outputs suitable for tests.

pub mod path;
pub mod summary;
pub mod types;
