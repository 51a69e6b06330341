//! Declarative pipeline execution engine.
//!
//! Routes are declared as `METHOD /path/{Var} -> ReturnType :: stage | stage | ...`
//! and compiled once into dispatchable handlers. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (route compilation, percentile
//!   budgets, property evaluation, optimization advice). No I/O.
//! - **[`io`]**: The capability provider seam plus config and program loading.
//!
//! [`interpreter`] runs one compiled pipeline against a provider, and
//! [`engine`] dispatches requests, records latency and schedules the
//! property/advisor analysis pass.

pub mod ast;
pub mod core;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod interpreter;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
