//! Error taxonomy for the engine.
//!
//! Two tiers with different blast radius:
//!
//! - [`CompileError`] is fatal at load time. One bad route rejects the whole
//!   program before any request is served.
//! - [`RequestError`] is raised while interpreting a single request. The
//!   dispatcher converts it to an error payload; it never escapes to other
//!   requests.

use serde_json::{Value, json};
use thiserror::Error;

/// Load-time failure compiling a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("route '{route}': malformed route declaration '{spec}'")]
    MalformedRoute { route: String, spec: String },

    #[error("route '{route}': invalid path '{path}'")]
    InvalidPath { route: String, path: String },

    #[error("route '{route}': path variable '{{{name}}}' declared more than once")]
    DuplicatePathVariable { route: String, name: String },

    #[error("route '{route}': unknown capability '{name}'")]
    UnknownCapability { route: String, name: String },

    #[error("route '{route}': invalid budget '{stage}': {reason}")]
    InvalidBudget {
        route: String,
        stage: String,
        reason: String,
    },

    #[error("route '{route}': malformed stage '{stage}': {reason}")]
    MalformedStage {
        route: String,
        stage: String,
        reason: String,
    },

    #[error("route '{route}': precondition needs a path variable or an explicit key")]
    MissingPreconditionKey { route: String },

    /// Rejected by `EngineConfig::validate` before any route is compiled.
    #[error("invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Per-request failure. Recovered at the dispatch boundary.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("unsupported segment '{0}'")]
    UnsupportedSegment(String),

    #[error("precondition failed: {field} of '{key}' is {actual}, expected one of [{}]", .allowed.join(","))]
    PreconditionFailed {
        key: String,
        field: String,
        /// `absent` when the item itself is missing.
        actual: String,
        allowed: Vec<String>,
    },

    #[error("{stage} requires a sequence, got {found}")]
    NotASequence { stage: &'static str, found: String },

    #[error("unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("capability '{name}' failed: {source:#}")]
    Capability {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl RequestError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::UnsupportedSegment(_) => "unsupported_segment",
            RequestError::PreconditionFailed { .. } => "precondition_failed",
            RequestError::NotASequence { .. } => "type_error",
            RequestError::UnboundVariable(_) => "unbound_variable",
            RequestError::Capability { .. } => "capability_error",
        }
    }

    /// Client-visible error payload.
    pub fn to_payload(&self) -> Value {
        error_payload(self.kind(), &self.to_string())
    }
}

pub(crate) fn error_payload(kind: &str, message: &str) -> Value {
    json!({ "error": { "kind": kind, "message": message } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_message_lists_allowed_values() {
        let err = RequestError::PreconditionFailed {
            key: "order:7".to_string(),
            field: "U4".to_string(),
            actual: "1".to_string(),
            allowed: vec!["2".to_string(), "3".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "precondition failed: U4 of 'order:7' is 1, expected one of [2,3]"
        );
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn payload_carries_kind_and_message() {
        let err = RequestError::UnsupportedSegment("email".to_string());
        let payload = err.to_payload();
        assert_eq!(payload["error"]["kind"], "unsupported_segment");
        assert_eq!(payload["error"]["message"], "unsupported segment 'email'");
    }

    #[test]
    fn duplicate_variable_message_renders_braces() {
        let err = CompileError::DuplicatePathVariable {
            route: "r1".to_string(),
            name: "Id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "route 'r1': path variable '{Id}' declared more than once"
        );
    }
}
