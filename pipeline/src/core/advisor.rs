//! Heuristic pipeline rewrite suggestions for budgeted routes.
//!
//! Read-only: suggestions are reported, never applied.

use serde::Serialize;

use crate::core::route::CompiledRoute;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvisorLimits {
    /// Limit proposed when a budgeted route has no page stage.
    pub default_page_limit: usize,
    /// Page limits above this are proposed to be lowered to it.
    pub max_page_limit: usize,
}

impl Default for AdvisorLimits {
    fn default() -> Self {
        Self {
            default_page_limit: 20,
            max_page_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Suggestion {
    AddPage { route: String, limit: usize },
    ReducePage { route: String, from: usize, to: usize },
}

impl Suggestion {
    pub fn route(&self) -> &str {
        match self {
            Suggestion::AddPage { route, .. } | Suggestion::ReducePage { route, .. } => route,
        }
    }
}

/// At most one suggestion per budgeted route, in route order.
pub fn advise<'a, I>(routes: I, limits: AdvisorLimits) -> Vec<Suggestion>
where
    I: IntoIterator<Item = &'a CompiledRoute>,
{
    routes
        .into_iter()
        .filter(|route| !route.budgets.is_empty())
        .filter_map(|route| match route.page_limit() {
            None => Some(Suggestion::AddPage {
                route: route.id.clone(),
                limit: limits.default_page_limit,
            }),
            Some(limit) if limit > limits.max_page_limit => Some(Suggestion::ReducePage {
                route: route.id.clone(),
                from: limit,
                to: limits.max_page_limit,
            }),
            Some(_) => None,
        })
        .collect()
}
