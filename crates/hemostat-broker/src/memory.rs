//! In-memory broker
//!
//! TTL-aware, single-process implementation of the broker interface. Backs
//! the test suites and embedded deployments that run all four agents in one
//! process without an external Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use hemostat_common::Result;

use crate::broker::Broker;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug)]
struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Shared {
    data: RwLock<HashMap<String, Entry>>,
    lists: RwLock<HashMap<String, ListEntry>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<String>>>>,
    published: RwLock<Vec<(String, String)>>,
}

/// In-process broker with the same semantics as the Redis client
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, as (channel, payload) pairs
    pub async fn published_messages(&self) -> Vec<(String, String)> {
        self.inner.published.read().await.clone()
    }

    /// Messages published to one channel
    pub async fn published_on(&self, channel: &str) -> Vec<String> {
        self.inner
            .published
            .read()
            .await
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut data = self.inner.data.write().await;
        if data.get(key).is_some_and(|entry| entry.expired(now)) {
            data.remove(key);
            return Ok(None);
        }
        Ok(data.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.inner.data.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.data.write().await.remove(key).is_some())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut data = self.inner.data.write().await;
        let live = data.get(key).is_some_and(|entry| !entry.expired(now));
        if live {
            return Ok(false);
        }
        data.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn push_bounded(
        &self,
        key: &str,
        entry: &str,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        let now = Instant::now();
        let mut lists = self.inner.lists.write().await;
        let list = lists.entry(key.to_string()).or_insert_with(|| ListEntry {
            items: VecDeque::new(),
            expires_at: None,
        });
        if list.expires_at.is_some_and(|at| now >= at) {
            list.items.clear();
        }
        list.items.push_front(entry.to_string());
        list.items.truncate(max_len);
        list.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut lists = self.inner.lists.write().await;
        if lists
            .get(key)
            .is_some_and(|list| list.expires_at.is_some_and(|at| now >= at))
        {
            lists.remove(key);
            return Ok(Vec::new());
        }
        Ok(lists
            .get(key)
            .map(|list| list.items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.inner
            .published
            .write()
            .await
            .push((channel.to_string(), payload.to_string()));

        let targets: Vec<mpsc::Sender<String>> = {
            let subscribers = self.inner.subscribers.read().await;
            subscribers.get(channel).cloned().unwrap_or_default()
        };
        for tx in &targets {
            // A closed receiver just means that subscriber went away
            let _ = tx.send(payload.to_string()).await;
        }
        if targets.iter().any(|tx| tx.is_closed()) {
            let mut subscribers = self.inner.subscribers.write().await;
            if let Some(list) = subscribers.get_mut(channel) {
                list.retain(|tx| !tx.is_closed());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(256);
        self.inner
            .subscribers
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let broker = MemoryBroker::new();
        broker.set("k", "v", None).await.unwrap();
        assert_eq!(broker.get("k").await.unwrap(), Some("v".to_string()));
        assert!(broker.delete("k").await.unwrap());
        assert_eq!(broker.get("k").await.unwrap(), None);
        assert!(!broker.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn ttl_expires_values() {
        let broker = MemoryBroker::new();
        broker
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(broker.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(broker.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_is_first_writer_wins() {
        let broker = MemoryBroker::new();
        assert!(broker
            .set_if_absent("lock", "a", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!broker
            .set_if_absent("lock", "b", Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(broker.get("lock").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn set_if_absent_succeeds_after_expiry() {
        let broker = MemoryBroker::new();
        assert!(broker
            .set_if_absent("lock", "a", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(broker
            .set_if_absent("lock", "b", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bounded_list_trims_and_orders_newest_first() {
        let broker = MemoryBroker::new();
        for i in 0..5 {
            broker
                .push_bounded("events", &i.to_string(), 3, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let items = broker.list("events").await.unwrap();
        assert_eq!(items, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_in_order() {
        let broker = MemoryBroker::new();
        let mut rx = broker.subscribe("ch").await.unwrap();
        broker.publish("ch", "one").await.unwrap();
        broker.publish("ch", "two").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert_eq!(broker.published_on("ch").await.len(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fire_and_forget() {
        let broker = MemoryBroker::new();
        broker.publish("ch", "lost").await.unwrap();
        assert_eq!(broker.published_on("ch").await, vec!["lost"]);
    }
}
