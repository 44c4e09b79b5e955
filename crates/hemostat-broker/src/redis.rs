//! Redis-backed broker client
//!
//! Commands go through a `ConnectionManager` (which re-establishes dropped
//! connections on its own); every command carries the configured deadline.
//! Each subscription owns a dedicated pub/sub connection driven by a
//! forwarder task that resubscribes with exponential backoff until the
//! attempt budget is exhausted, at which point the receiver closes and the
//! owning agent treats the loss as fatal.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hemostat_common::config::BrokerConfig;
use hemostat_common::{Error, Result};

use crate::broker::Broker;

/// Production broker client over Redis
pub struct RedisBroker {
    config: BrokerConfig,
    manager: ConnectionManager,
    client: Client,
}

impl RedisBroker {
    /// Connect with the configured backoff schedule and verify the
    /// connection with a round-trip ping
    pub async fn connect(config: BrokerConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| Error::Broker(format!("invalid broker url: {e}")))?;

        let mut attempt = 1u32;
        let manager = loop {
            match ConnectionManager::new(client.clone()).await {
                Ok(manager) => break manager,
                Err(e) => match config.reconnect.delay_for_attempt(attempt) {
                    Some(delay) => {
                        warn!(
                            "broker connect attempt {} failed, retrying in {:?}: {}",
                            attempt, delay, e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(Error::Broker(format!(
                            "could not connect to broker after {} attempts: {}",
                            attempt - 1,
                            e
                        )))
                    }
                },
            }
        };

        let broker = Self {
            config,
            manager,
            client,
        };
        broker.ping().await?;
        info!("connected to broker at {}", broker.config.url);
        Ok(broker)
    }

    fn full_key(&self, key: &str) -> String {
        if self.config.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.config.key_prefix, key)
        }
    }

    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let deadline = Duration::from_millis(self.config.command_timeout_ms);
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result.map_err(|e| Error::Broker(format!("{op}: {e}"))),
            Err(_) => Err(Error::Timeout(format!("broker {op} timed out"))),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let reply: String = self
            .timed("ping", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(Error::Broker(format!("unexpected ping reply: {reply}")))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.full_key(key);
        let mut conn = self.manager.clone();
        self.timed("get", async move { conn.get(&full_key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let full_key = self.full_key(key);
        let value = value.to_string();
        let mut conn = self.manager.clone();
        match ttl {
            Some(ttl) => {
                let seconds = ttl.as_secs().max(1) as usize;
                self.timed("set", async move {
                    conn.set_ex(&full_key, &value, seconds).await
                })
                .await
            }
            None => {
                self.timed("set", async move { conn.set(&full_key, &value).await })
                    .await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.full_key(key);
        let mut conn = self.manager.clone();
        let removed: i64 = self
            .timed("del", async move { conn.del(&full_key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let full_key = self.full_key(key);
        let value = value.to_string();
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .timed("set_if_absent", async move {
                redis::cmd("SET")
                    .arg(&full_key)
                    .arg(&value)
                    .arg("NX")
                    .arg("EX")
                    .arg(seconds)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn push_bounded(
        &self,
        key: &str,
        entry: &str,
        max_len: usize,
        ttl: Duration,
    ) -> Result<()> {
        let full_key = self.full_key(key);
        let entry = entry.to_string();
        let stop = max_len.saturating_sub(1) as isize;
        let seconds = ttl.as_secs().max(1) as usize;
        let mut conn = self.manager.clone();
        // MULTI/EXEC keeps the trim and TTL refresh atomic with the push
        self.timed("push_bounded", async move {
            redis::pipe()
                .atomic()
                .lpush(&full_key, &entry)
                .ignore()
                .ltrim(&full_key, 0, stop)
                .ignore()
                .expire(&full_key, seconds)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn list(&self, key: &str) -> Result<Vec<String>> {
        let full_key = self.full_key(key);
        let mut conn = self.manager.clone();
        self.timed("lrange", async move { conn.lrange(&full_key, 0, -1).await })
            .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let full_channel = self.full_key(channel);
        let payload = payload.to_string();
        let mut conn = self.manager.clone();
        let _receivers: i64 = self
            .timed("publish", async move {
                conn.publish(&full_channel, &payload).await
            })
            .await?;
        debug!("published to {}", channel);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let full_channel = self.full_key(channel);
        let logical = channel.to_string();
        let reconnect = self.config.reconnect.clone();

        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                match client.get_async_connection().await {
                    Ok(conn) => {
                        let mut pubsub = conn.into_pubsub();
                        match pubsub.subscribe(&full_channel).await {
                            Ok(()) => {
                                debug!("subscribed to {}", full_channel);
                                attempt = 0;
                                let mut stream = pubsub.on_message();
                                loop {
                                    tokio::select! {
                                        _ = tx.closed() => return,
                                        message = stream.next() => match message {
                                            Some(message) => match message.get_payload::<String>() {
                                                Ok(payload) => {
                                                    if tx.send(payload).await.is_err() {
                                                        return;
                                                    }
                                                }
                                                Err(e) => {
                                                    warn!("undecodable payload on {}: {}", logical, e);
                                                }
                                            },
                                            // Stream end means the pub/sub connection dropped
                                            None => break,
                                        }
                                    }
                                }
                            }
                            Err(e) => warn!("subscribe to {} failed: {}", logical, e),
                        }
                    }
                    Err(e) => warn!("pub/sub connection for {} failed: {}", logical, e),
                }

                attempt += 1;
                match reconnect.delay_for_attempt(attempt) {
                    Some(delay) => {
                        warn!(
                            "resubscribing to {} in {:?} (attempt {})",
                            logical, delay, attempt
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!("subscription to {} lost permanently", logical);
                        // Dropping tx closes the receiver and surfaces the loss
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}
