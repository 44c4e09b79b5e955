//! Responder agent and worker pool
//!
//! The channel dispatcher stays serial; requests are queued to a pool of
//! `max_parallel_actions` workers so distinct containers can proceed in
//! parallel. Per-container serialization comes from the single-writer lock
//! key, so two workers (or two Responder instances) never actuate the same
//! container concurrently.
//!
//! Guard order is significant: existence, dry-run, cooldown, circuit, lock.
//! The cooldown slot is reserved before the runtime call and reverted on
//! failure, so a crash mid-execute cannot double-actuate inside one window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hemostat_broker::{get_json, push_json, set_json, AgentContext, MessageHandler};
use hemostat_common::config::ResponderConfig;
use hemostat_common::{
    keys, Action, ActionResult, Envelope, MessageKind, RejectionReason, RemediationOutcome,
    RemediationRequest, Result,
};
use hemostat_runtime::ContainerRuntime;

use crate::actions;
use crate::safety::{cooldown_active, CircuitRing, CooldownRecord};

pub const AGENT_NAME: &str = "responder";

/// Audit trail entry, one per processed request
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub result: ActionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempt: u32,
}

struct ResponderCore {
    ctx: AgentContext,
    runtime: Arc<dyn ContainerRuntime>,
    config: ResponderConfig,
}

/// Remediation agent: the handler enqueues, the worker pool executes
pub struct ResponderAgent {
    queue: mpsc::Sender<RemediationRequest>,
}

impl ResponderAgent {
    /// Build the agent and spawn its worker pool. The returned handles
    /// drain the in-flight queue once the agent (the last queue sender) is
    /// dropped.
    pub fn spawn(
        ctx: AgentContext,
        runtime: Arc<dyn ContainerRuntime>,
        config: ResponderConfig,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let workers = config.max_parallel_actions.max(1);
        let (queue, rx) = mpsc::channel::<RemediationRequest>(64);
        let rx = Arc::new(Mutex::new(rx));
        let core = Arc::new(ResponderCore {
            ctx,
            runtime,
            config,
        });

        let handles = (0..workers)
            .map(|worker| {
                let core = Arc::clone(&core);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let request = { rx.lock().await.recv().await };
                        match request {
                            Some(request) => {
                                if let Err(e) = core.process(request).await {
                                    warn!(worker, "request dropped: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    debug!(worker, "responder worker stopped");
                })
            })
            .collect();

        (Arc::new(Self { queue }), handles)
    }
}

#[async_trait]
impl MessageHandler for ResponderAgent {
    async fn handle(&self, envelope: Envelope) -> Result<()> {
        let request: RemediationRequest = envelope.decode()?;
        self.queue
            .send(request)
            .await
            .map_err(|_| hemostat_common::Error::Internal("worker pool stopped".to_string()))
    }
}

impl ResponderCore {
    /// Process one request end to end: guard, execute, bookkeep, audit,
    /// publish exactly one outcome.
    async fn process(&self, request: RemediationRequest) -> Result<()> {
        let started = std::time::Instant::now();
        let outcome = self.evaluate(&request).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let outcome = RemediationOutcome {
            duration_ms,
            ..outcome
        };

        let audit = AuditEntry {
            timestamp: Utc::now(),
            action: outcome.action,
            result: outcome.result,
            rejection_reason: outcome.rejection_reason,
            dry_run: outcome.dry_run,
            error: outcome.error.clone(),
            duration_ms,
            attempt: outcome.attempt,
        };
        push_json(
            self.ctx.broker(),
            &keys::audit(&request.container.id),
            &audit,
            self.config.audit_max_entries,
            Duration::from_secs(self.config.audit_ttl_seconds),
        )
        .await?;

        counter!(
            "hemostat_remediations_total",
            "result" => outcome.result.as_str(),
            "action" => outcome.action.as_str()
        )
        .increment(1);

        info!(
            container = %request.container.name,
            action = outcome.action.as_str(),
            result = outcome.result.as_str(),
            duration_ms,
            "remediation outcome"
        );
        self.ctx
            .publish(MessageKind::RemediationComplete, &outcome)
            .await
    }

    /// Run the guard chain and, when it passes, the action itself.
    /// Returns the outcome with `duration_ms` left for the caller.
    async fn evaluate(&self, request: &RemediationRequest) -> Result<RemediationOutcome> {
        let container_id = &request.container.id;
        let now = Utc::now();
        let window = Duration::from_secs(self.config.circuit_window_seconds);

        let mut ring: CircuitRing = get_json(self.ctx.broker(), &keys::circuit(container_id))
            .await?
            .unwrap_or_default();
        ring.trim(now, window);
        let attempt = ring.len() as u32 + 1;

        let base = |result: ActionResult,
                    rejection_reason: Option<RejectionReason>,
                    error: Option<String>| RemediationOutcome {
            container: request.container.clone(),
            action: request.action,
            result,
            rejection_reason,
            dry_run: self.config.dry_run,
            reason: Some(request.reason.clone()),
            confidence: Some(request.confidence),
            error,
            duration_ms: 0,
            attempt,
        };
        let rejected = |reason: RejectionReason| {
            base(ActionResult::Rejected, Some(reason), None)
        };

        // An action outside the vocabulary is rejected, not attempted
        if request.action == Action::None {
            return Ok(rejected(RejectionReason::UnsupportedAction));
        }

        // 1. Existence
        match self.runtime.inspect(container_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Ok(rejected(RejectionReason::UnknownContainer)),
            // A runtime error here already counts as a failed attempt
            Err(e) => {
                return Ok(base(
                    ActionResult::Failed,
                    None,
                    Some(format!("{}: {}", e.category(), e)),
                ))
            }
        }

        // 2. Dry run: full bookkeeping, no side effects
        if self.config.dry_run {
            debug!(container = %request.container.name, "dry run, skipping actuation");
            return Ok(rejected(RejectionReason::DryRunSkipped));
        }

        // 3. Cooldown
        let cooldown = Duration::from_secs(self.config.cooldown_seconds);
        let previous: Option<CooldownRecord> =
            get_json(self.ctx.broker(), &keys::cooldown(container_id)).await?;
        if let Some(record) = &previous {
            if cooldown_active(record, now, cooldown) {
                return Ok(rejected(RejectionReason::CooldownActive));
            }
        }

        // 4. Circuit breaker
        if ring.is_open(self.config.max_retries_per_window) {
            return Ok(rejected(RejectionReason::CircuitOpen));
        }

        // 5. Single-writer lock. Losing the claim means another Responder
        // is handling this container; the conservative mapping is cooldown.
        let lock_key = keys::lock(container_id);
        let token = uuid::Uuid::new_v4().to_string();
        let lock_ttl = Duration::from_millis(self.config.action_deadline_ms.max(1_000));
        if !self
            .ctx
            .broker()
            .set_if_absent(&lock_key, &token, lock_ttl)
            .await?
        {
            return Ok(rejected(RejectionReason::CooldownActive));
        }

        let outcome = self
            .execute_locked(request, now, previous, ring, base)
            .await;
        if let Err(e) = self.ctx.broker().delete(&lock_key).await {
            warn!(container = %request.container.name, "failed to release lock: {}", e);
        }
        outcome
    }

    /// Steps that run under the single-writer lock: reserve the cooldown
    /// slot, execute, and settle the bookkeeping.
    async fn execute_locked(
        &self,
        request: &RemediationRequest,
        now: DateTime<Utc>,
        previous_cooldown: Option<CooldownRecord>,
        mut ring: CircuitRing,
        base: impl Fn(ActionResult, Option<RejectionReason>, Option<String>) -> RemediationOutcome,
    ) -> Result<RemediationOutcome> {
        let container_id = &request.container.id;
        let cooldown_key = keys::cooldown(container_id);
        let record_ttl = Duration::from_secs(
            self.config
                .cooldown_seconds
                .max(self.config.circuit_window_seconds),
        );

        // Reserve the slot before touching the runtime
        let reservation = CooldownRecord {
            last_action_at: now,
            last_action: request.action,
        };
        set_json(
            self.ctx.broker(),
            &cooldown_key,
            &reservation,
            Some(record_ttl),
        )
        .await?;

        let execution =
            actions::execute(self.runtime.as_ref(), &self.config, container_id, request.action)
                .await;

        match execution.result {
            ActionResult::Success => {
                ring.record(now);
                set_json(
                    self.ctx.broker(),
                    &keys::circuit(container_id),
                    &ring,
                    Some(record_ttl),
                )
                .await?;
            }
            ActionResult::Failed => {
                // A failed attempt must not open a cooldown window, but it
                // still counts against the circuit
                self.revert_cooldown(&cooldown_key, previous_cooldown, record_ttl)
                    .await?;
                ring.record(now);
                set_json(
                    self.ctx.broker(),
                    &keys::circuit(container_id),
                    &ring,
                    Some(record_ttl),
                )
                .await?;
            }
            ActionResult::NotApplicable => {
                // Nothing was actuated
                self.revert_cooldown(&cooldown_key, previous_cooldown, record_ttl)
                    .await?;
            }
            ActionResult::Rejected => {
                unreachable!("execution never yields a rejection")
            }
        }

        Ok(base(execution.result, None, execution.error))
    }

    async fn revert_cooldown(
        &self,
        cooldown_key: &str,
        previous: Option<CooldownRecord>,
        record_ttl: Duration,
    ) -> Result<()> {
        match previous {
            Some(record) => {
                set_json(self.ctx.broker(), cooldown_key, &record, Some(record_ttl)).await
            }
            None => self
                .ctx
                .broker()
                .delete(cooldown_key)
                .await
                .map(|_| ()),
        }
    }
}
