//! I/O seams for the engine: capability provider, configuration and program loading.

pub mod capability;
pub mod config;
pub mod program;
