//! Per-route latency history and percentile budget checks.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::core::types::BudgetConstraint;

/// A budget whose percentile exceeded its threshold after a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetViolation {
    pub route: String,
    pub percentile: f64,
    pub observed_ms: f64,
    pub threshold_ms: f64,
}

/// Nearest-rank percentile over an ascending-sorted slice.
///
/// `index = ceil(percentile * len / 100) - 1`, clamped to `[0, len - 1]`.
/// Multiplying before dividing keeps whole-number ranks exact.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (percentile * sorted.len() as f64 / 100.0).ceil() as i64 - 1;
    let index = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    Some(sorted[index])
}

/// Append-only latency samples for one route.
///
/// Appends and percentile recomputation happen under one lock, so a reader
/// never observes a half-applied append. The history is never truncated.
#[derive(Debug, Default)]
pub struct LatencyHistory {
    samples: Mutex<Vec<f64>>,
}

impl LatencyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `elapsed_ms` and re-evaluate every budget over the full history.
    pub fn record(
        &self,
        route: &str,
        elapsed_ms: f64,
        budgets: &[BudgetConstraint],
    ) -> Vec<BudgetViolation> {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.push(elapsed_ms);
        if budgets.is_empty() {
            return Vec::new();
        }

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);
        budgets
            .iter()
            .filter_map(|budget| {
                let observed = nearest_rank(&sorted, budget.percentile)?;
                (observed > budget.threshold_ms).then(|| BudgetViolation {
                    route: route.to_string(),
                    percentile: budget.percentile,
                    observed_ms: observed,
                    threshold_ms: budget.threshold_ms,
                })
            })
            .collect()
    }

    /// Snapshot of samples in arrival order.
    pub fn snapshot(&self) -> Vec<f64> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
