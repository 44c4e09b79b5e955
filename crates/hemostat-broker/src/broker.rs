//! Broker interface
//!
//! Object-safe trait over the pub/sub bus and keyed store. Payloads are JSON
//! strings at this layer; typed helpers below handle (de)serialization so
//! call sites stay readable.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use hemostat_common::Result;

/// Broker capability shared by all agents
#[async_trait]
pub trait Broker: Send + Sync {
    /// Round-trip liveness probe
    async fn ping(&self) -> Result<()>;

    /// Get a value from the keyed store
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, optionally with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically set a key only if absent; returns whether this call won.
    /// Used for dedup sentinels and single-writer guards.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Prepend an entry to a list, trim it to `max_len`, and refresh its TTL
    async fn push_bounded(
        &self,
        key: &str,
        entry: &str,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()>;

    /// Read a whole list, most recent entry first
    async fn list(&self, key: &str) -> Result<Vec<String>>;

    /// Publish a payload to a channel, fire-and-forget
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a channel. Messages arrive in publish order on the
    /// returned receiver; a closed receiver means the subscription is gone
    /// for good (reconnection exhausted).
    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>>;
}

/// Get and deserialize a stored value
pub async fn get_json<T: DeserializeOwned>(broker: &dyn Broker, key: &str) -> Result<Option<T>> {
    match broker.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Serialize and store a value
pub async fn set_json<T: Serialize>(
    broker: &dyn Broker,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    broker.set(key, &raw, ttl).await
}

/// Serialize and append a value to a bounded list
pub async fn push_json<T: Serialize>(
    broker: &dyn Broker,
    key: &str,
    value: &T,
    max_len: usize,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    broker.push_bounded(key, &raw, max_len, ttl).await
}
