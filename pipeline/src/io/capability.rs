//! Capability provider abstraction.
//!
//! The [`CapabilityProvider`] trait decouples the engine from the concrete
//! store and wire transport. Tests use an in-memory provider
//! (`test_support::MemoryProvider`) without any network access.
//!
//! Concurrency contract: reads (`get`, `scan`) may run in parallel; writes to
//! distinct keys are independent; writes to the same key are last-writer-wins.
//! No operation is transactional across calls.

use std::time::SystemTime;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// External operations a pipeline may invoke.
///
/// Only [`post`](CapabilityProvider::post) may suspend; everything else is
/// expected to complete synchronously.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Item stored at `key`, or `None` when absent.
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Items whose key starts with `prefix`, in key order.
    fn scan(&self, prefix: &str) -> Result<Vec<Value>>;

    /// Outbound call. Suspends only the calling request.
    async fn post(&self, host: &str, path: &str, body: &str) -> Result<Value>;

    fn now(&self) -> SystemTime;

    /// Digest of `bytes`.
    fn hash(&self, bytes: &[u8]) -> Vec<u8>;
}
