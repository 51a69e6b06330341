//! Pipeline interpreter.
//!
//! Threads a single current value through a compiled route's segments. The
//! value starts undefined; scans produce sequences, gets produce a single item
//! (or `null` when absent), filters and pages reshape sequences, and effects
//! leave it untouched. The first failing segment aborts the whole pipeline.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::expr::{evaluate, stringify};
use crate::core::route::CompiledRoute;
use crate::core::types::{Effect, FilterCondition, FilterOp, Precondition, Segment};
use crate::error::RequestError;
use crate::io::capability::CapabilityProvider;

/// Query parameters: name → values, in request order.
pub type QueryParams = HashMap<String, Vec<String>>;

/// Per-request inputs. Discarded after the response.
pub struct RequestContext<'a> {
    /// Captured path variables.
    pub vars: HashMap<String, String>,
    pub query: &'a QueryParams,
    pub provider: &'a dyn CapabilityProvider,
}

/// Run `route`'s pipeline and return its final value (`null` when undefined).
#[instrument(skip_all, fields(route = %route.id))]
pub async fn execute(route: &CompiledRoute, ctx: &RequestContext<'_>) -> Result<Value, RequestError> {
    let mut current: Option<Value> = None;
    for segment in &route.segments {
        debug!(stage = segment.label(), "running segment");
        run_segment(segment, &mut current, ctx).await?;
    }
    Ok(current.unwrap_or(Value::Null))
}

async fn run_segment(
    segment: &Segment,
    current: &mut Option<Value>,
    ctx: &RequestContext<'_>,
) -> Result<(), RequestError> {
    match segment {
        Segment::ScanByPrefix(prefix) => {
            let items = ctx.provider.scan(prefix).map_err(capability("scan"))?;
            *current = Some(Value::Array(items));
        }
        Segment::GetByKey(expr) => {
            let key = evaluate(expr, &ctx.vars)?;
            let item = ctx.provider.get(&key).map_err(capability("get"))?;
            *current = Some(item.unwrap_or(Value::Null));
        }
        Segment::Filter(cond) => match current.as_mut() {
            Some(Value::Array(items)) => items.retain(|item| keep(item, cond, ctx.query)),
            other => {
                return Err(RequestError::NotASequence {
                    stage: "filter",
                    found: describe(other.as_deref()),
                });
            }
        },
        Segment::Page(limit) => {
            if let Some(Value::Array(items)) = current.as_mut() {
                items.truncate(*limit);
            }
        }
        Segment::Precondition(pre) => check_precondition(pre, ctx)?,
        Segment::EffectCall { effect, args } => run_effect(*effect, args, ctx).await?,
        Segment::Unsupported(name) => {
            return Err(RequestError::UnsupportedSegment(name.clone()));
        }
    }
    Ok(())
}

fn keep(item: &Value, cond: &FilterCondition, query: &QueryParams) -> bool {
    let field = stringify(item.get(&cond.field));
    let values = query.get(&cond.param).map(Vec::as_slice).unwrap_or(&[]);
    match cond.op {
        FilterOp::In => values.is_empty() || values.iter().any(|v| *v == field),
        FilterOp::Contains => {
            let needle = values.first().map(String::as_str).unwrap_or("");
            field.to_lowercase().contains(&needle.to_lowercase())
        }
    }
}

fn check_precondition(pre: &Precondition, ctx: &RequestContext<'_>) -> Result<(), RequestError> {
    let key = evaluate(&pre.key, &ctx.vars)?;
    let item = ctx.provider.get(&key).map_err(capability("get"))?;
    let actual = match item {
        None | Some(Value::Null) => None,
        Some(item) => Some(stringify(item.get(&pre.field))),
    };
    match actual {
        Some(actual) if pre.allowed.contains(&actual) => Ok(()),
        actual => Err(RequestError::PreconditionFailed {
            key,
            field: pre.field.clone(),
            actual: actual.unwrap_or_else(|| "absent".to_string()),
            allowed: pre.allowed.clone(),
        }),
    }
}

async fn run_effect(
    effect: Effect,
    args: &[String],
    ctx: &RequestContext<'_>,
) -> Result<(), RequestError> {
    let args = args
        .iter()
        .map(|arg| evaluate(arg, &ctx.vars))
        .collect::<Result<Vec<_>, _>>()?;
    let provider = ctx.provider;
    match (effect, args.as_slice()) {
        (Effect::Set, [key, value]) => {
            provider
                .set(key, Value::String(value.clone()))
                .map_err(capability("set"))?;
        }
        (Effect::Post, [host, path, body]) => {
            let response = provider
                .post(host, path, body)
                .await
                .map_err(capability("post"))?;
            debug!(host = %host, path = %path, response = %response, "post completed");
        }
        (Effect::Hash, [data]) => {
            let digest = provider.hash(data.as_bytes());
            debug!(bytes = digest.len(), "hash computed");
        }
        (Effect::Now, []) => {
            debug!(now = ?provider.now(), "clock read");
        }
        (effect, _) => return Err(RequestError::UnsupportedSegment(effect.name().to_string())),
    }
    Ok(())
}

fn capability(name: &'static str) -> impl FnOnce(anyhow::Error) -> RequestError {
    move |source| RequestError::Capability { name, source }
}

fn describe(value: Option<&Value>) -> String {
    let kind = match value {
        None => "undefined",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "sequence",
        Some(Value::Object(_)) => "item",
    };
    kind.to_string()
}
