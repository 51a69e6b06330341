//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod advisor;
pub mod budget;
pub mod expr;
pub mod property;
pub mod route;
pub mod types;
