//! Shared deterministic types for compiled routes.
//!
//! Everything here is produced once by the route compiler and never mutated
//! afterwards. Execution matches on these variants structurally; no stage text
//! is re-parsed at request time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP method a route answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(format!("unknown method '{raw}'")),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latency service-level constraint: `percentile` of observed latencies must
/// stay at or below `threshold_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetConstraint {
    /// In `(0, 100]`.
    pub percentile: f64,
    /// Always milliseconds, `>= 0`.
    pub threshold_ms: f64,
}

/// How a filter stage compares an item field against a query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `field in ?q.name`: exact membership in the parameter's value set.
    In,
    /// `field ~ ?q.name`: case-insensitive substring match.
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    /// Query parameter name (the part after `?q.`).
    pub param: String,
}

/// `req(field ... [v1,v2])`: the authoritative item's field must be one of `allowed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub field: String,
    pub allowed: Vec<String>,
    /// Key expression locating the authoritative item.
    pub key: String,
}

/// Outbound capability invoked by an effect stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Set,
    Post,
    Hash,
    Now,
}

impl Effect {
    /// Resolve a capability name to an effect the interpreter can run.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "set" => Some(Effect::Set),
            "post" => Some(Effect::Post),
            "hash" => Some(Effect::Hash),
            "now" => Some(Effect::Now),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Effect::Set => "set",
            Effect::Post => "post",
            Effect::Hash => "hash",
            Effect::Now => "now",
        }
    }
}

/// One compiled pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    ScanByPrefix(String),
    GetByKey(String),
    Filter(FilterCondition),
    Page(usize),
    Precondition(Precondition),
    EffectCall { effect: Effect, args: Vec<String> },
    /// A dictionary-approved operation the interpreter has no binding for.
    /// Fails the request when reached.
    Unsupported(String),
}

impl Segment {
    /// Short stage label used in logs and advisor output.
    pub fn label(&self) -> &str {
        match self {
            Segment::ScanByPrefix(_) => "scan",
            Segment::GetByKey(_) => "get",
            Segment::Filter(_) => "filter",
            Segment::Page(_) => "page",
            Segment::Precondition(_) => "req",
            Segment::EffectCall { effect, .. } => effect.name(),
            Segment::Unsupported(name) => name,
        }
    }
}
