//! Alert agent
//!
//! One handler serves both subscribed channels. Order of operations is
//! fixed: persist first (unconditional), then dedup, then deliver. A
//! suppressed or failed delivery still leaves the event visible in the UI
//! lists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, warn};

use hemostat_broker::{AgentContext, MessageHandler};
use hemostat_common::config::AlertConfig;
use hemostat_common::{
    keys, Envelope, FalseAlarm, MessageKind, RemediationOutcome, Result,
};

use crate::dedupe::dedupe_digest;
use crate::events;
use crate::notifier::{Notification, WebhookNotifier};

pub const AGENT_NAME: &str = "alert";

/// Notification and persistence agent
pub struct AlertAgent {
    ctx: AgentContext,
    config: AlertConfig,
    notifier: Option<WebhookNotifier>,
    deduped: AtomicU64,
}

impl AlertAgent {
    pub fn new(ctx: AgentContext, config: AlertConfig) -> Result<Self> {
        let notifier = match (&config.webhook_url, config.notifications_enabled) {
            (Some(url), true) => Some(WebhookNotifier::new(&config, url.clone())?),
            _ => None,
        };
        Ok(Self {
            ctx,
            config,
            notifier,
            deduped: AtomicU64::new(0),
        })
    }

    /// Count of notifications suppressed by dedup since startup
    pub fn deduped_count(&self) -> u64 {
        self.deduped.load(Ordering::Relaxed)
    }

    /// Notification and dedup discriminator for one envelope
    fn notification_for(&self, envelope: &Envelope) -> Result<(Notification, String, String)> {
        match envelope.kind {
            MessageKind::RemediationComplete => {
                let outcome: RemediationOutcome = envelope.decode()?;
                let discriminator = outcome.action.as_str().to_string();
                let container_id = outcome.container.id.clone();
                Ok((
                    Notification::for_outcome(&outcome),
                    container_id,
                    discriminator,
                ))
            }
            MessageKind::FalseAlarm => {
                let alarm: FalseAlarm = envelope.decode()?;
                let discriminator = alarm.reason.clone();
                let container_id = alarm.container.id.clone();
                Ok((
                    Notification::for_false_alarm(&alarm),
                    container_id,
                    discriminator,
                ))
            }
            other => Err(hemostat_common::Error::MalformedPayload(format!(
                "alert agent received unexpected kind {}",
                other.as_str()
            ))),
        }
    }
}

#[async_trait]
impl MessageHandler for AlertAgent {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        // Decode first so a malformed event is dropped before persistence
        let (notification, container_id, discriminator) = self.notification_for(&envelope)?;

        // 1. Persist, unconditionally
        let record = events::record_for(&envelope);
        events::persist(self.ctx.broker(), &self.config, &record).await?;

        // 2. Delivery gate
        let Some(notifier) = &self.notifier else {
            debug!("notifications disabled, persisted only");
            return Ok(());
        };

        // 3. Dedup: only the sentinel winner delivers
        let digest = dedupe_digest(
            &container_id,
            envelope.kind,
            &discriminator,
            envelope.timestamp,
        );
        let fresh = self
            .ctx
            .broker()
            .set_if_absent(
                &keys::dedupe(&digest),
                "1",
                Duration::from_secs(self.config.dedupe_ttl_seconds),
            )
            .await?;
        if !fresh {
            self.deduped.fetch_add(1, Ordering::Relaxed);
            counter!("hemostat_notifications_deduped_total").increment(1);
            info!(
                container = %notification.container,
                kind = envelope.kind.as_str(),
                "duplicate notification suppressed"
            );
            return Ok(());
        }

        // 4. Deliver; failures never propagate into the pipeline
        if let Err(e) = notifier.deliver(&notification).await {
            warn!(container = %notification.container, "delivery failed: {}", e);
        } else {
            counter!("hemostat_notifications_delivered_total").increment(1);
        }
        Ok(())
    }
}
