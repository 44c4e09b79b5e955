//! Shared agent runtime
//!
//! Agents are long-lived tasks wired to the broker: a context for enveloped
//! publication and keyed-state access, plus a dispatcher loop per subscribed
//! channel. Handlers run strictly serially per channel; a malformed payload
//! or a failed handler is logged and skipped, never fatal. A closed
//! subscription (reconnect budget exhausted) is the one fatal condition.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use hemostat_common::{Envelope, Error, MessageKind, Result};

use crate::broker::Broker;

/// Per-agent handle on the broker
#[derive(Clone)]
pub struct AgentContext {
    name: String,
    broker: Arc<dyn Broker>,
}

impl AgentContext {
    pub fn new(name: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        Self {
            name: name.into(),
            broker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &dyn Broker {
        self.broker.as_ref()
    }

    pub fn broker_arc(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.broker)
    }

    /// Wrap a payload in the standard envelope and publish it on the kind's
    /// channel, at-least-once
    pub async fn publish<T: Serialize>(&self, kind: MessageKind, data: &T) -> Result<()> {
        let envelope = Envelope::new(&self.name, kind, data)?;
        self.broker
            .publish(kind.channel(), &envelope.to_json()?)
            .await?;
        debug!(
            agent = %self.name,
            channel = kind.channel(),
            "published message"
        );
        Ok(())
    }
}

/// Handler for one subscribed channel
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope) -> Result<()>;
}

/// Drive one channel subscription until shutdown.
///
/// Messages are handled in arrival order; the next message is not read until
/// the current handler returns. Returns an error only when the subscription
/// is lost for good.
pub async fn run_dispatcher(
    ctx: &AgentContext,
    channel: &str,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut rx = ctx.broker().subscribe(channel).await?;
    info!(agent = %ctx.name(), channel, "dispatcher started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = rx.recv() => match message {
                None => {
                    return Err(Error::Broker(format!("subscription to {channel} lost")));
                }
                Some(raw) => {
                    let envelope = match Envelope::from_json(&raw) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!(agent = %ctx.name(), channel, "dropping message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = handler.handle(envelope).await {
                        warn!(
                            agent = %ctx.name(),
                            channel,
                            category = e.category(),
                            "handler failed, message dropped: {}",
                            e
                        );
                    }
                }
            }
        }
    }

    info!(agent = %ctx.name(), channel, "dispatcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, envelope: Envelope) -> Result<()> {
            let tag: String = envelope.decode()?;
            if tag == "boom" {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(Error::Internal("boom".to_string()));
            }
            self.seen.lock().await.push(tag);
            Ok(())
        }
    }

    fn setup() -> (Arc<MemoryBroker>, AgentContext, Arc<Recorder>) {
        let broker = Arc::new(MemoryBroker::new());
        let ctx = AgentContext::new("test-agent", broker.clone() as Arc<dyn Broker>);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        });
        (broker, ctx, recorder)
    }

    async fn publish_tag(ctx: &AgentContext, tag: &str) {
        ctx.publish(MessageKind::HealthAlert, &tag.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dispatcher_preserves_publish_order() {
        let (_broker, ctx, recorder) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);

        let dispatcher = {
            let ctx = ctx.clone();
            let recorder = recorder.clone() as Arc<dyn MessageHandler>;
            tokio::spawn(async move {
                run_dispatcher(&ctx, "health_alert", recorder, stop_rx).await
            })
        };
        // Give the dispatcher time to subscribe before the first publish
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        for tag in ["a", "b", "c"] {
            publish_tag(&ctx, tag).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        dispatcher.await.unwrap().unwrap();

        assert_eq!(*recorder.seen.lock().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn malformed_and_failing_messages_are_skipped() {
        let (broker, ctx, recorder) = setup();
        let (stop_tx, stop_rx) = watch::channel(false);

        let dispatcher = {
            let ctx = ctx.clone();
            let recorder_dyn = recorder.clone() as Arc<dyn MessageHandler>;
            tokio::spawn(async move {
                run_dispatcher(&ctx, "health_alert", recorder_dyn, stop_rx).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        broker.publish("health_alert", "{not an envelope").await.unwrap();
        publish_tag(&ctx, "boom").await;
        publish_tag(&ctx, "after").await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        dispatcher.await.unwrap().unwrap();

        assert_eq!(*recorder.seen.lock().await, vec!["after"]);
        assert_eq!(recorder.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_subscription_is_fatal() {
        let broker = Arc::new(MemoryBroker::new());
        let ctx = AgentContext::new("test-agent", broker as Arc<dyn Broker>);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }) as Arc<dyn MessageHandler>;

        // Receiver with a dropped sender: subscribe against a broker clone
        // that goes away is simulated by closing the channel directly.
        let (_stop_tx, stop_rx) = watch::channel(false);
        struct ClosedBroker(MemoryBroker);
        #[async_trait]
        impl Broker for ClosedBroker {
            async fn ping(&self) -> Result<()> {
                self.0.ping().await
            }
            async fn get(&self, key: &str) -> Result<Option<String>> {
                self.0.get(key).await
            }
            async fn set(
                &self,
                key: &str,
                value: &str,
                ttl: Option<std::time::Duration>,
            ) -> Result<()> {
                self.0.set(key, value, ttl).await
            }
            async fn delete(&self, key: &str) -> Result<bool> {
                self.0.delete(key).await
            }
            async fn set_if_absent(
                &self,
                key: &str,
                value: &str,
                ttl: std::time::Duration,
            ) -> Result<bool> {
                self.0.set_if_absent(key, value, ttl).await
            }
            async fn push_bounded(
                &self,
                key: &str,
                entry: &str,
                max_len: usize,
                ttl: std::time::Duration,
            ) -> Result<()> {
                self.0.push_bounded(key, entry, max_len, ttl).await
            }
            async fn list(&self, key: &str) -> Result<Vec<String>> {
                self.0.list(key).await
            }
            async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
                self.0.publish(channel, payload).await
            }
            async fn subscribe(
                &self,
                _channel: &str,
            ) -> Result<tokio::sync::mpsc::Receiver<String>> {
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
                Ok(rx)
            }
        }

        let ctx = AgentContext::new(ctx.name(), Arc::new(ClosedBroker(MemoryBroker::new())));
        let err = run_dispatcher(&ctx, "health_alert", recorder, stop_rx)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "broker");
    }
}
