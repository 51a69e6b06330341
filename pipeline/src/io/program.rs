//! Load the JSON program AST emitted by the front-end.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::ast::ProgramAst;

/// Read and parse a program AST from disk.
pub fn load_program(path: &Path) -> Result<ProgramAst> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read program {}", path.display()))?;
    let program: ProgramAst = serde_json::from_str(&contents)
        .with_context(|| format!("parse program {}", path.display()))?;
    debug!(
        path = %path.display(),
        routes = program.routes.len(),
        properties = program.properties.len(),
        enums = program.enums.len(),
        "program loaded"
    );
    Ok(program)
}
