//! Observability hooks.
//!
//! Hooks are purely diagnostic: they run after the pipeline has produced its
//! result and can neither block nor alter a response.

use tracing::{info, warn};

use crate::core::advisor::Suggestion;
use crate::core::budget::BudgetViolation;

pub trait EngineHooks: Send + Sync {
    /// A declared percentile budget was exceeded for a route.
    fn on_budget_violation(&self, violation: &BudgetViolation);

    /// At least one supported property does not hold over the current data.
    fn on_property_check_failure(&self);

    /// The advisor proposed a pipeline rewrite.
    fn on_suggestion(&self, suggestion: &Suggestion) {
        let _ = suggestion;
    }
}

/// Default hooks: structured log lines only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingHooks;

impl EngineHooks for TracingHooks {
    fn on_budget_violation(&self, violation: &BudgetViolation) {
        warn!(
            route = %violation.route,
            percentile = violation.percentile,
            observed_ms = violation.observed_ms,
            threshold_ms = violation.threshold_ms,
            "latency budget exceeded"
        );
    }

    fn on_property_check_failure(&self) {
        warn!("property check failed");
    }

    fn on_suggestion(&self, suggestion: &Suggestion) {
        info!(route = suggestion.route(), ?suggestion, "optimization suggestion");
    }
}
