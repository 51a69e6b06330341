//! Dispatcher: selects a compiled route per request and orchestrates the
//! interpreter, latency tracking and the analysis pass.
//!
//! Routes are tried in declaration order; only routes whose method equals the
//! request method are considered and the first path match wins. There is no
//! further ambiguity resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::ast::ProgramAst;
use crate::core::advisor::{AdvisorLimits, Suggestion, advise};
use crate::core::budget::LatencyHistory;
use crate::core::property::PropertyChecker;
use crate::core::route::CompiledRoute;
use crate::core::types::Method;
use crate::error::{CompileError, RequestError, error_payload};
use crate::hooks::EngineHooks;
use crate::interpreter::{self, QueryParams, RequestContext};
use crate::io::capability::CapabilityProvider;
use crate::io::config::{AnalysisMode, EngineConfig};

/// Result of dispatching one request.
#[derive(Debug)]
pub enum Outcome {
    /// Final pipeline value.
    Success(Value),
    NotFound { method: String, path: String },
    Failed(RequestError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Structured response body.
    pub fn to_payload(&self) -> Value {
        match self {
            Outcome::Success(value) => value.clone(),
            Outcome::NotFound { method, path } => {
                error_payload("not_found", &format!("no route for {method} {path}"))
            }
            Outcome::Failed(err) => err.to_payload(),
        }
    }
}

/// Output of one property + advisor pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    /// `None` when the snapshot could not be read.
    pub properties_hold: Option<bool>,
    pub suggestions: Vec<Suggestion>,
}

struct RouteSlot {
    route: CompiledRoute,
    latency: LatencyHistory,
}

struct EngineInner {
    routes: Vec<RouteSlot>,
    provider: Arc<dyn CapabilityProvider>,
    hooks: Arc<dyn EngineHooks>,
    properties: PropertyChecker,
    analysis: AnalysisMode,
    advisor: AdvisorLimits,
    /// Set while a background pass is queued or running.
    analysis_in_flight: AtomicBool,
}

/// Clears the in-flight flag when the background pass ends, even by panic.
struct InFlight(Arc<EngineInner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.analysis_in_flight.store(false, Ordering::Release);
    }
}

/// Compiled program bound to a capability provider. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Validate `config`, then compile every route and property. Any error
    /// rejects the program.
    pub fn load(
        program: &ProgramAst,
        config: &EngineConfig,
        provider: Arc<dyn CapabilityProvider>,
        hooks: Arc<dyn EngineHooks>,
    ) -> Result<Self, CompileError> {
        config
            .validate()
            .map_err(|err| CompileError::InvalidConfig {
                reason: format!("{err:#}"),
            })?;
        let routes = config.route_compiler().compile_all(
            program
                .routes
                .iter()
                .map(|(id, spec)| (id, spec.as_str())),
        )?;

        let inferred_prefix = routes
            .first()
            .and_then(CompiledRoute::first_scan_prefix)
            .unwrap_or(config.properties.default_scan_prefix.as_str())
            .to_string();
        let properties = PropertyChecker::new(
            program.properties.iter().map(|(id, raw)| (id, raw.as_str())),
            &program.enum_table(),
            &config.properties.scopes,
            &inferred_prefix,
        );

        info!(
            routes = routes.len(),
            properties = properties.properties().len(),
            scan_prefix = %inferred_prefix,
            "program compiled"
        );

        let routes = routes
            .into_iter()
            .map(|route| RouteSlot {
                route,
                latency: LatencyHistory::new(),
            })
            .collect();

        Ok(Self {
            inner: Arc::new(EngineInner {
                routes,
                provider,
                hooks,
                properties,
                analysis: config.analysis,
                advisor: config.advisor_limits(),
                analysis_in_flight: AtomicBool::new(false),
            }),
        })
    }

    /// Compiled routes in declaration order.
    pub fn routes(&self) -> impl Iterator<Item = &CompiledRoute> {
        self.inner.routes.iter().map(|slot| &slot.route)
    }

    /// Latency samples recorded for `route_id`, in arrival order.
    pub fn latency_history(&self, route_id: &str) -> Option<Vec<f64>> {
        self.inner
            .routes
            .iter()
            .find(|slot| slot.route.id == route_id)
            .map(|slot| slot.latency.snapshot())
    }

    /// Dispatch one request.
    ///
    /// Never fails: per-request errors become [`Outcome::Failed`].
    #[instrument(skip(self, query), fields(route))]
    pub async fn handle(&self, method: &str, path: &str, query: &QueryParams) -> Outcome {
        let Some((slot, vars)) = self.select(method, path) else {
            debug!("no matching route");
            return Outcome::NotFound {
                method: method.to_string(),
                path: path.to_string(),
            };
        };
        tracing::Span::current().record("route", slot.route.id.as_str());

        let ctx = RequestContext {
            vars,
            query,
            provider: self.inner.provider.as_ref(),
        };
        let start = Instant::now();
        let result = interpreter::execute(&slot.route, &ctx).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let violations = slot
            .latency
            .record(&slot.route.id, elapsed_ms, &slot.route.budgets);
        for violation in &violations {
            self.inner.hooks.on_budget_violation(violation);
        }
        self.schedule_analysis();

        match result {
            Ok(value) => {
                debug!(elapsed_ms, "request completed");
                Outcome::Success(value)
            }
            Err(err) => {
                warn!(elapsed_ms, kind = err.kind(), error = %err, "request failed");
                Outcome::Failed(err)
            }
        }
    }

    fn select(&self, method: &str, path: &str) -> Option<(&RouteSlot, HashMap<String, String>)> {
        let method: Method = method.parse().ok()?;
        self.inner
            .routes
            .iter()
            .filter(|slot| slot.route.method == method)
            .find_map(|slot| slot.route.match_path(path).map(|vars| (slot, vars)))
    }

    fn schedule_analysis(&self) {
        match self.inner.analysis {
            AnalysisMode::Off => {}
            AnalysisMode::Inline => {
                self.run_analysis();
            }
            AnalysisMode::Background => {
                let Ok(handle) = tokio::runtime::Handle::try_current() else {
                    debug!("no tokio runtime; skipping background analysis");
                    return;
                };
                // Requests arriving while a pass is pending share its result.
                if self
                    .inner
                    .analysis_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    debug!("analysis pass already in flight");
                    return;
                }
                let engine = self.clone();
                let guard = InFlight(Arc::clone(&self.inner));
                handle.spawn_blocking(move || {
                    let _guard = guard;
                    engine.run_analysis();
                });
            }
        }
    }

    /// Run the property checker and the advisor once, reporting through hooks.
    pub fn run_analysis(&self) -> AnalysisReport {
        let properties_hold = match self.check_properties() {
            Ok(hold) => {
                if !hold {
                    self.inner.hooks.on_property_check_failure();
                }
                Some(hold)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "property snapshot failed");
                None
            }
        };

        let suggestions = self.suggestions();
        for suggestion in &suggestions {
            self.inner.hooks.on_suggestion(suggestion);
        }

        AnalysisReport {
            properties_hold,
            suggestions,
        }
    }

    /// Evaluate every supported property over a fresh provider snapshot.
    pub fn check_properties(&self) -> Result<bool> {
        let checker = &self.inner.properties;
        let mut snapshots = HashMap::new();
        for prefix in checker.scan_prefixes() {
            let items = self
                .inner
                .provider
                .scan(prefix)
                .with_context(|| format!("scan '{prefix}' for property check"))?;
            snapshots.insert(prefix.to_string(), items);
        }
        Ok(checker.evaluate(&snapshots))
    }

    /// Advisor output for the current route set.
    pub fn suggestions(&self) -> Vec<Suggestion> {
        advise(self.routes(), self.inner.advisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::AdvisorConfig;
    use crate::test_support::{MemoryProvider, RecordingHooks};
    use serde_json::json;
    use std::time::Duration;

    fn program(routes: &[(&str, &str)]) -> ProgramAst {
        ProgramAst {
            routes: routes
                .iter()
                .map(|(id, spec)| (id.to_string(), spec.to_string()))
                .collect(),
            ..ProgramAst::default()
        }
    }

    fn inline_config() -> EngineConfig {
        EngineConfig {
            analysis: AnalysisMode::Inline,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn method_must_match_before_path() {
        let program = program(&[
            ("create", r#"POST /orders -> Order :: set("order:new", "x")"#),
            ("list", r#"GET /orders -> [Order] :: scan("order:")"#),
        ]);
        let provider = Arc::new(MemoryProvider::with_items([("order:A", json!({"id": "A"}))]));
        let engine = Engine::load(
            &program,
            &inline_config(),
            provider,
            Arc::new(RecordingHooks::default()),
        )
        .expect("load");

        let outcome = engine.handle("GET", "/orders", &QueryParams::new()).await;
        assert_eq!(outcome.to_payload(), json!([{"id": "A"}]));
        assert_eq!(engine.latency_history("list").expect("list").len(), 1);
        assert_eq!(engine.latency_history("create").expect("create").len(), 0);
    }

    #[tokio::test]
    async fn first_declared_match_wins() {
        let program = program(&[
            ("specific", r#"GET /orders/{Id} -> Order :: get("order:" + Id)"#),
            ("shadowed", r#"GET /orders/{Other} -> Order :: scan("order:")"#),
        ]);
        let provider = Arc::new(MemoryProvider::with_items([("order:A", json!({"id": "A"}))]));
        let engine = Engine::load(
            &program,
            &inline_config(),
            provider,
            Arc::new(RecordingHooks::default()),
        )
        .expect("load");

        let outcome = engine.handle("GET", "/orders/A", &QueryParams::new()).await;
        assert_eq!(outcome.to_payload(), json!({"id": "A"}));
        assert!(engine.latency_history("shadowed").expect("shadowed").is_empty());
    }

    #[tokio::test]
    async fn unknown_method_or_path_is_not_found() {
        let program = program(&[("list", r#"GET /orders -> [Order] :: scan("order:")"#)]);
        let engine = Engine::load(
            &program,
            &inline_config(),
            Arc::new(MemoryProvider::default()),
            Arc::new(RecordingHooks::default()),
        )
        .expect("load");

        for (method, path) in [("GET", "/users"), ("BREW", "/orders"), ("DELETE", "/orders")] {
            let outcome = engine.handle(method, path, &QueryParams::new()).await;
            assert!(matches!(outcome, Outcome::NotFound { .. }), "{method} {path}");
            assert_eq!(outcome.to_payload()["error"]["kind"], "not_found");
        }
    }

    #[test]
    fn property_scope_is_inferred_from_first_route() {
        let mut program = program(&[
            ("list", r#"GET /orders -> [Order] :: scan("order:")"#),
            ("users", r#"GET /users -> [User] :: scan("user:")"#),
        ]);
        program
            .properties
            .insert("nonneg", "U3(x) >= 0".to_string());
        let provider = Arc::new(MemoryProvider::with_items([
            ("order:A", json!({"U3": 1})),
            ("user:1", json!({"U3": -5})),
        ]));
        let engine = Engine::load(
            &program,
            &inline_config(),
            provider,
            Arc::new(RecordingHooks::default()),
        )
        .expect("load");

        assert!(engine.check_properties().expect("check"));
    }

    #[test]
    fn compile_error_rejects_whole_program() {
        let program = program(&[
            ("ok", r#"GET /a -> A :: scan("a:")"#),
            ("bad", r#"GET /b -> B :: teleport()"#),
        ]);
        let err = Engine::load(
            &program,
            &EngineConfig::default(),
            Arc::new(MemoryProvider::default()),
            Arc::new(RecordingHooks::default()),
        )
        .err()
        .expect("load must fail");
        assert!(matches!(err, CompileError::UnknownCapability { .. }));
    }

    #[test]
    fn invalid_config_rejects_load() {
        let program = program(&[("list", r#"GET /orders -> [Order] :: scan("order:")"#)]);
        let config = EngineConfig {
            advisor: AdvisorConfig {
                default_page_limit: 20,
                max_page_limit: 0,
            },
            ..EngineConfig::default()
        };
        let err = Engine::load(
            &program,
            &config,
            Arc::new(MemoryProvider::default()),
            Arc::new(RecordingHooks::default()),
        )
        .err()
        .expect("load must fail");
        assert!(matches!(err, CompileError::InvalidConfig { .. }));
        assert!(err.to_string().contains("max_page_limit"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_passes_do_not_pile_up() {
        let mut program = program(&[
            ("list", r#"GET /orders -> [Order] :: scan("order:")"#),
            ("one", r#"GET /orders/{Id} -> Order :: get("order:" + Id)"#),
        ]);
        program
            .properties
            .insert("nonneg", "U3(x) >= 0".to_string());
        let provider = Arc::new(MemoryProvider::with_items([(
            "order:A",
            json!({"id": "A", "U3": -1}),
        )]));
        provider.delay_scans(Duration::from_millis(200));
        let hooks = Arc::new(RecordingHooks::default());
        let engine = Engine::load(
            &program,
            &EngineConfig::default(),
            provider,
            hooks.clone(),
        )
        .expect("load");

        for _ in 0..5 {
            let outcome = engine.handle("GET", "/orders/A", &QueryParams::new()).await;
            assert!(outcome.is_success());
        }

        let mut waited = 0;
        while hooks.property_failures() == 0 && waited < 200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(hooks.property_failures(), 1);

        engine.handle("GET", "/orders/A", &QueryParams::new()).await;
        let mut waited = 0;
        while hooks.property_failures() == 1 && waited < 200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(hooks.property_failures(), 2, "flag is cleared after a pass");
    }
}
