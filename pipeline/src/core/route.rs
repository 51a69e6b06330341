//! Route compiler: `METHOD /path/{Var} -> ReturnType :: stage | stage | ...`.
//!
//! Compilation happens once at load time and is all-or-nothing. Any malformed
//! declaration or unknown capability is reported as a [`CompileError`] and no
//! route is served.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::expr::{split_args, split_quoted, unquote};
use crate::core::types::{
    BudgetConstraint, Effect, FilterCondition, FilterOp, Method, Precondition, Segment,
};
use crate::error::CompileError;

static ROUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\s+(\S+)\s*->\s*(.+?)\s*::\s*(.+?)\s*$")
        .expect("valid route regex")
});
static BUDGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!\s*p(\d+(?:\.\d+)?)\s*<\s*(\d+(?:\.\d+)?)\s*(ms|s)$").expect("valid budget regex")
});
static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?$").expect("valid call regex")
});
static FILTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\w+)\s+(in|~)\s+\?q\.(\w+)$").expect("valid filter regex")
});
static PRECONDITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\b.*\[(.*)\]$").expect("valid precondition regex"));
static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));
static LITERAL_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.~-]+$").expect("valid literal regex"));

/// Pipeline builtins that bypass the capability dictionary.
const BUILTINS: [&str; 3] = ["filter", "page", "req"];

/// Operation name → enabled. Injected into the compiler; stages naming a
/// disabled or absent capability are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityDictionary(BTreeMap<String, bool>);

impl CapabilityDictionary {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(|name| (name.into(), true)).collect())
    }

    pub fn allows(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }
}

impl Default for CapabilityDictionary {
    fn default() -> Self {
        Self::new(["get", "set", "scan", "post", "now", "hash"])
    }
}

/// Immutable, executable form of a route declaration.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// Declaration id from the program.
    pub id: String,
    pub method: Method,
    /// Path template as declared, e.g. `/orders/{OrderId}`.
    pub path: String,
    pub return_type: String,
    /// Path variable names in template order. Unique.
    pub variables: Vec<String>,
    pub segments: Vec<Segment>,
    pub budgets: Vec<BudgetConstraint>,
    matcher: Regex,
}

impl CompiledRoute {
    /// Match a request path, returning captured path variables on success.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.matcher.captures(path)?;
        Some(
            self.variables
                .iter()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    /// Prefix of the first scan stage, if any.
    pub fn first_scan_prefix(&self) -> Option<&str> {
        self.segments.iter().find_map(|segment| match segment {
            Segment::ScanByPrefix(prefix) => Some(prefix.as_str()),
            _ => None,
        })
    }

    /// Limit of the first page stage, if any.
    pub fn page_limit(&self) -> Option<usize> {
        self.segments.iter().find_map(|segment| match segment {
            Segment::Page(limit) => Some(*limit),
            _ => None,
        })
    }
}

/// Compiler configuration.
#[derive(Debug, Clone, Default)]
pub struct RouteCompiler {
    pub capabilities: CapabilityDictionary,
    /// Literal prepended to the first path variable to form a precondition key.
    pub precondition_key_prefix: String,
    /// Explicit precondition key expressions by route id.
    pub precondition_keys: BTreeMap<String, String>,
}

impl RouteCompiler {
    pub fn new(capabilities: CapabilityDictionary) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Compile every declaration in order, stopping at the first error.
    pub fn compile_all<'a, I>(&self, routes: I) -> Result<Vec<CompiledRoute>, CompileError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        routes
            .into_iter()
            .map(|(id, spec)| self.compile(id, spec))
            .collect()
    }

    /// Compile one route declaration.
    pub fn compile(&self, id: &str, spec: &str) -> Result<CompiledRoute, CompileError> {
        let malformed = || CompileError::MalformedRoute {
            route: id.to_string(),
            spec: spec.to_string(),
        };
        let caps = ROUTE_RE.captures(spec).ok_or_else(malformed)?;
        let method: Method = caps[1].parse().map_err(|_| malformed())?;
        let path = caps[2].to_string();
        let return_type = caps[3].to_string();

        let (matcher, variables) = compile_path(id, &path)?;

        let mut segments = Vec::new();
        let mut budgets = Vec::new();
        for stage in split_quoted(&caps[4], '|') {
            if stage.starts_with('!') {
                budgets.push(parse_budget(id, &stage)?);
            } else {
                segments.push(self.compile_stage(id, &stage, &variables)?);
            }
        }

        debug!(
            route = id,
            %method,
            path = %path,
            segments = segments.len(),
            budgets = budgets.len(),
            "compiled route"
        );

        Ok(CompiledRoute {
            id: id.to_string(),
            method,
            path,
            return_type,
            variables,
            segments,
            budgets,
            matcher,
        })
    }

    fn compile_stage(
        &self,
        route: &str,
        stage: &str,
        variables: &[String],
    ) -> Result<Segment, CompileError> {
        let malformed = |reason: &str| CompileError::MalformedStage {
            route: route.to_string(),
            stage: stage.to_string(),
            reason: reason.to_string(),
        };
        let caps = CALL_RE
            .captures(stage)
            .ok_or_else(|| malformed("expected name(args)"))?;
        let name = &caps[1];
        let args = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        if !BUILTINS.contains(&name) && !self.capabilities.allows(name) {
            return Err(CompileError::UnknownCapability {
                route: route.to_string(),
                name: name.to_string(),
            });
        }

        let segment = match name {
            "scan" => {
                let prefix = unquote(args).unwrap_or(args);
                Segment::ScanByPrefix(prefix.to_string())
            }
            "get" => {
                if args.is_empty() {
                    return Err(malformed("get needs a key expression"));
                }
                Segment::GetByKey(args.to_string())
            }
            "filter" => {
                let cond = FILTER_RE
                    .captures(args)
                    .ok_or_else(|| malformed("expected '<field> in|~ ?q.<name>'"))?;
                Segment::Filter(FilterCondition {
                    field: cond[1].to_string(),
                    op: if &cond[2] == "in" {
                        FilterOp::In
                    } else {
                        FilterOp::Contains
                    },
                    param: cond[3].to_string(),
                })
            }
            "page" => {
                let limit = args
                    .parse::<usize>()
                    .map_err(|_| malformed("page limit must be a non-negative integer"))?;
                Segment::Page(limit)
            }
            "req" => {
                let cond = PRECONDITION_RE
                    .captures(args)
                    .ok_or_else(|| malformed("expected '<field> ... [v1,v2,...]'"))?;
                let allowed = split_args(&cond[2])
                    .iter()
                    .map(|value| unquote(value).unwrap_or(value).to_string())
                    .collect();
                Segment::Precondition(Precondition {
                    field: cond[1].to_string(),
                    allowed,
                    key: self.precondition_key(route, variables)?,
                })
            }
            _ => match Effect::from_name(name) {
                Some(effect) => {
                    let args = split_args(args);
                    let expected = effect_arity(effect);
                    if args.len() != expected {
                        return Err(malformed(&format!(
                            "{} takes {expected} argument(s), got {}",
                            effect.name(),
                            args.len()
                        )));
                    }
                    Segment::EffectCall { effect, args }
                }
                None => Segment::Unsupported(name.to_string()),
            },
        };
        Ok(segment)
    }

    fn precondition_key(&self, route: &str, variables: &[String]) -> Result<String, CompileError> {
        if let Some(explicit) = self.precondition_keys.get(route) {
            return Ok(explicit.clone());
        }
        let first = variables
            .first()
            .ok_or_else(|| CompileError::MissingPreconditionKey {
                route: route.to_string(),
            })?;
        if self.precondition_key_prefix.is_empty() {
            return Ok(first.clone());
        }
        Ok(format!("\"{}\" + {first}", self.precondition_key_prefix))
    }
}

fn effect_arity(effect: Effect) -> usize {
    match effect {
        Effect::Set => 2,
        Effect::Post => 3,
        Effect::Hash => 1,
        Effect::Now => 0,
    }
}

/// Build the anchored matcher for a path template and collect its variables.
fn compile_path(route: &str, path: &str) -> Result<(Regex, Vec<String>), CompileError> {
    let invalid = || CompileError::InvalidPath {
        route: route.to_string(),
        path: path.to_string(),
    };
    let rest = path.strip_prefix('/').ok_or_else(invalid)?;

    let mut pattern = String::from("^");
    let mut variables = Vec::new();
    let mut seen = HashSet::new();
    if !rest.is_empty() {
        for part in rest.split('/') {
            pattern.push('/');
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if !IDENT_RE.is_match(name) {
                    return Err(invalid());
                }
                if !seen.insert(name) {
                    return Err(CompileError::DuplicatePathVariable {
                        route: route.to_string(),
                        name: name.to_string(),
                    });
                }
                pattern.push_str(&format!("(?P<{name}>[^/]+)"));
                variables.push(name.to_string());
            } else if LITERAL_PART_RE.is_match(part) {
                pattern.push_str(&regex::escape(part));
            } else {
                return Err(invalid());
            }
        }
    } else {
        pattern.push('/');
    }
    pattern.push('$');

    let matcher = Regex::new(&pattern).map_err(|_| invalid())?;
    Ok((matcher, variables))
}

fn parse_budget(route: &str, stage: &str) -> Result<BudgetConstraint, CompileError> {
    let invalid = |reason: &str| CompileError::InvalidBudget {
        route: route.to_string(),
        stage: stage.to_string(),
        reason: reason.to_string(),
    };
    let caps = BUDGET_RE
        .captures(stage)
        .ok_or_else(|| invalid("expected '!p<N><<threshold><ms|s>'"))?;
    let percentile: f64 = caps[1].parse().map_err(|_| invalid("bad percentile"))?;
    if !(percentile > 0.0 && percentile <= 100.0) {
        return Err(invalid("percentile must be in (0, 100]"));
    }
    let threshold: f64 = caps[2].parse().map_err(|_| invalid("bad threshold"))?;
    let threshold_ms = if &caps[3] == "s" {
        threshold * 1000.0
    } else {
        threshold
    };
    Ok(BudgetConstraint {
        percentile,
        threshold_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> RouteCompiler {
        RouteCompiler::new(CapabilityDictionary::default())
    }

    #[test]
    fn compiles_stages_and_budgets_in_order() {
        let route = compiler()
            .compile(
                "list",
                r#"GET /orders -> [Order] :: scan("order:") | filter(status in ?q.s) | page(10) | !p99<200ms | !p50<1s"#,
            )
            .expect("compile");

        assert_eq!(route.method, Method::Get);
        assert_eq!(route.return_type, "[Order]");
        assert_eq!(
            route.segments,
            vec![
                Segment::ScanByPrefix("order:".to_string()),
                Segment::Filter(FilterCondition {
                    field: "status".to_string(),
                    op: FilterOp::In,
                    param: "s".to_string(),
                }),
                Segment::Page(10),
            ]
        );
        assert_eq!(
            route.budgets,
            vec![
                BudgetConstraint {
                    percentile: 99.0,
                    threshold_ms: 200.0
                },
                BudgetConstraint {
                    percentile: 50.0,
                    threshold_ms: 1000.0
                },
            ]
        );
    }

    #[test]
    fn matcher_captures_variables_without_crossing_separators() {
        let route = compiler()
            .compile(
                "one",
                r#"GET /orders/{OrderId}/lines/{Line} -> Line :: get("line:" + OrderId + ":" + Line)"#,
            )
            .expect("compile");

        let vars = route.match_path("/orders/7/lines/3").expect("match");
        assert_eq!(vars["OrderId"], "7");
        assert_eq!(vars["Line"], "3");
        assert!(route.match_path("/orders/7/x/lines/3").is_none());
        assert!(route.match_path("/orders/7/lines").is_none());
    }

    #[test]
    fn root_path_matches_only_root() {
        let route = compiler()
            .compile("root", r#"GET / -> [Item] :: scan("")"#)
            .expect("compile");
        assert!(route.match_path("/").is_some());
        assert!(route.match_path("/x").is_none());
    }

    #[test]
    fn literal_path_parts_are_escaped() {
        let route = compiler()
            .compile("v", r#"GET /v1.0/items -> [Item] :: scan("item:")"#)
            .expect("compile");
        assert!(route.match_path("/v1.0/items").is_some());
        assert!(route.match_path("/v1x0/items").is_none());
    }

    #[test]
    fn unknown_capability_is_fatal() {
        let err = compiler()
            .compile("r", "POST /mail -> Unit :: email(\"x\")")
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownCapability {
                route: "r".to_string(),
                name: "email".to_string()
            }
        );
    }

    #[test]
    fn builtins_bypass_the_dictionary() {
        let compiler = RouteCompiler::new(CapabilityDictionary::new(["scan"]));
        compiler
            .compile("r", r#"GET /a -> [A] :: scan("a:") | filter(name ~ ?q.n) | page(5)"#)
            .expect("builtins are always allowed");
    }

    #[test]
    fn approved_name_without_binding_compiles_to_unsupported() {
        let compiler = RouteCompiler::new(CapabilityDictionary::new(["scan", "audit"]));
        let route = compiler
            .compile("r", r#"GET /a -> [A] :: scan("a:") | audit()"#)
            .expect("compile");
        assert_eq!(route.segments[1], Segment::Unsupported("audit".to_string()));
    }

    #[test]
    fn malformed_declarations_are_rejected() {
        let compiler = compiler();
        assert!(matches!(
            compiler.compile("r", "GET /a scan(\"a\")"),
            Err(CompileError::MalformedRoute { .. })
        ));
        assert!(matches!(
            compiler.compile("r", "FETCH /a -> A :: scan(\"a\")"),
            Err(CompileError::MalformedRoute { .. })
        ));
        assert!(matches!(
            compiler.compile("r", "GET orders -> A :: scan(\"a\")"),
            Err(CompileError::InvalidPath { .. })
        ));
        assert!(matches!(
            compiler.compile("r", "GET /a/{1x} -> A :: scan(\"a\")"),
            Err(CompileError::InvalidPath { .. })
        ));
        assert!(matches!(
            compiler.compile("r", "GET /a -> A :: page(many)"),
            Err(CompileError::MalformedStage { .. })
        ));
        assert!(matches!(
            compiler.compile("r", "GET /a -> A :: scan(\"a\") | filter(status == 1)"),
            Err(CompileError::MalformedStage { .. })
        ));
    }

    #[test]
    fn duplicate_path_variables_are_rejected() {
        let err = compiler()
            .compile("r", r#"GET /a/{Id}/b/{Id} -> A :: get(Id)"#)
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicatePathVariable { name, .. } if name == "Id"));
    }

    #[test]
    fn budget_percentile_must_be_in_range() {
        let compiler = compiler();
        for stage in ["!p0<10ms", "!p101<10ms", "!p99<10min"] {
            let spec = format!(r#"GET /a -> A :: scan("a") | {stage}"#);
            assert!(
                matches!(
                    compiler.compile("r", &spec),
                    Err(CompileError::InvalidBudget { .. })
                ),
                "{stage} should be rejected"
            );
        }
        let route = compiler
            .compile("r", r#"GET /a -> A :: scan("a") | !p100<0.5s"#)
            .expect("p100 is allowed");
        assert_eq!(route.budgets[0].threshold_ms, 500.0);
    }

    #[test]
    fn precondition_key_defaults_to_first_path_variable() {
        let compiler = RouteCompiler {
            precondition_key_prefix: "order:".to_string(),
            ..compiler()
        };
        let route = compiler
            .compile(
                "ship",
                r#"POST /orders/{OrderId}/ship -> Order :: req(U4 in [2, "3"]) | get("order:" + OrderId)"#,
            )
            .expect("compile");
        assert_eq!(
            route.segments[0],
            Segment::Precondition(Precondition {
                field: "U4".to_string(),
                allowed: vec!["2".to_string(), "3".to_string()],
                key: "\"order:\" + OrderId".to_string(),
            })
        );
    }

    #[test]
    fn explicit_precondition_key_overrides_convention() {
        let mut compiler = compiler();
        compiler
            .precondition_keys
            .insert("ship".to_string(), "\"account:\" + Account".to_string());
        let route = compiler
            .compile(
                "ship",
                r#"POST /accounts/{Account}/orders/{OrderId} -> Order :: req(state in [open])"#,
            )
            .expect("compile");
        let Segment::Precondition(pre) = &route.segments[0] else {
            panic!("expected precondition");
        };
        assert_eq!(pre.key, "\"account:\" + Account");
    }

    #[test]
    fn precondition_without_key_source_is_rejected() {
        let err = compiler()
            .compile("r", "POST /ship -> Order :: req(U4 in [2])")
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::MissingPreconditionKey {
                route: "r".to_string()
            }
        );
    }

    #[test]
    fn effect_arity_is_checked() {
        let compiler = compiler();
        let route = compiler
            .compile(
                "r",
                r#"POST /n/{Id} -> Unit :: post("hooks", "/n", "id=" + Id) | set("n:" + Id, "sent")"#,
            )
            .expect("compile");
        assert_eq!(route.segments.len(), 2);
        assert!(matches!(
            compiler.compile("r", r#"POST /n -> Unit :: post("hooks")"#),
            Err(CompileError::MalformedStage { .. })
        ));
    }

    #[test]
    fn compile_all_stops_at_first_error() {
        let err = compiler()
            .compile_all([
                ("ok", r#"GET /a -> A :: scan("a:")"#),
                ("bad", "GET /b -> B :: nope()"),
                ("never", "GET /c -> C :: alsonope()"),
            ])
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownCapability { route, .. } if route == "bad"));
    }
}
