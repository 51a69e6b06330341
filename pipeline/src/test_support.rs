//! Test-only helpers: an in-memory capability provider and recording hooks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::core::advisor::Suggestion;
use crate::core::budget::BudgetViolation;
use crate::hooks::EngineHooks;
use crate::io::capability::CapabilityProvider;

/// Key-ordered in-memory store. `post` calls are recorded, never sent.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    items: RwLock<BTreeMap<String, Value>>,
    posts: Mutex<Vec<(String, String, String)>>,
    post_failure: Mutex<Option<String>>,
    post_delay: Mutex<Option<Duration>>,
    scan_delay: Mutex<Option<Duration>>,
}

impl MemoryProvider {
    /// Create a provider seeded with `(key, item)` pairs.
    pub fn with_items<'a, I>(items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let provider = Self::default();
        for (key, item) in items {
            provider.insert(key, item);
        }
        provider
    }

    pub fn insert(&self, key: &str, item: Value) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), item);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Recorded `(host, path, body)` triples, in call order.
    pub fn posts(&self) -> Vec<(String, String, String)> {
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every subsequent `post` fail with `message`.
    pub fn fail_posts(&self, message: &str) {
        *self
            .post_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(message.to_string());
    }

    /// Make every subsequent `post` suspend for `delay` before completing.
    pub fn delay_posts(&self, delay: Duration) {
        *self
            .post_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Make every subsequent `scan` block the calling thread for `delay`.
    pub fn delay_scans(&self, delay: Duration) {
        *self
            .scan_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }
}

#[async_trait]
impl CapabilityProvider for MemoryProvider {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<Value>> {
        let delay = *self.scan_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn post(&self, host: &str, path: &str, body: &str) -> Result<Value> {
        let delay = *self.post_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .post_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(message) = failure {
            return Err(anyhow!("post to {host}{path}: {message}"));
        }
        self.posts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((host.to_string(), path.to_string(), body.to_string()));
        Ok(json!({ "status": 200 }))
    }

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn hash(&self, bytes: &[u8]) -> Vec<u8> {
        Sha256::digest(bytes).to_vec()
    }
}

/// Hooks that remember everything they were told.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    violations: Mutex<Vec<BudgetViolation>>,
    property_failures: AtomicUsize,
    suggestions: Mutex<Vec<Suggestion>>,
}

impl RecordingHooks {
    pub fn violations(&self) -> Vec<BudgetViolation> {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn property_failures(&self) -> usize {
        self.property_failures.load(Ordering::SeqCst)
    }

    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.suggestions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EngineHooks for RecordingHooks {
    fn on_budget_violation(&self, violation: &BudgetViolation) {
        self.violations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(violation.clone());
    }

    fn on_property_check_failure(&self) {
        self.property_failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_suggestion(&self, suggestion: &Suggestion) {
        self.suggestions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(suggestion.clone());
    }
}

/// Build query parameters from `(name, value)` pairs; repeated names accumulate.
pub fn query(pairs: &[(&str, &str)]) -> crate::interpreter::QueryParams {
    let mut query = crate::interpreter::QueryParams::new();
    for (name, value) in pairs {
        query
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }
    query
}
