//! Monitor agent loop
//!
//! One sampling cycle per poll interval. Per-container failures are isolated
//! to that container; an unreachable runtime skips the whole cycle, which is
//! retried at the next tick. No alert is ever emitted for a container the
//! Monitor could not sample.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use hemostat_broker::{set_json, AgentContext};
use hemostat_common::config::MonitorConfig;
use hemostat_common::{keys, ContainerSample, HealthAlert, MessageKind, Result};
use hemostat_runtime::{ContainerRuntime, ContainerSummary};

use crate::anomaly::detect_anomalies;
use crate::sampler::{build_sample, CpuTracker};

pub const AGENT_NAME: &str = "monitor";

/// Periodic sampling agent
pub struct MonitorAgent {
    ctx: AgentContext,
    runtime: Arc<dyn ContainerRuntime>,
    config: MonitorConfig,
    cpu: CpuTracker,
}

impl MonitorAgent {
    pub fn new(
        ctx: AgentContext,
        runtime: Arc<dyn ContainerRuntime>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            ctx,
            runtime,
            config,
            cpu: CpuTracker::new(),
        }
    }

    /// Run cycles until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.poll_interval_seconds.max(1),
        ));
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "monitor started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle().await {
                        warn!("sampling cycle skipped: {}", e);
                    }
                }
            }
        }

        info!("monitor stopped");
        Ok(())
    }

    /// One full sampling cycle. Errors out only when enumeration itself
    /// fails; per-container errors are logged and skipped.
    pub async fn cycle(&mut self) -> Result<()> {
        let containers = self.runtime.list_containers().await?;
        debug!("sampling {} containers", containers.len());

        let live_ids: Vec<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        self.cpu.retain_live(&live_ids);

        for summary in &containers {
            match self.sample_one(summary).await {
                Ok(Some(sample)) => {
                    if let Err(e) = self.publish_sample(&sample).await {
                        warn!(container = %summary.name, "failed to publish: {}", e);
                    }
                }
                Ok(None) => {
                    debug!(container = %summary.name, "container vanished mid-cycle");
                }
                Err(e) => {
                    warn!(container = %summary.name, "failed to sample: {}", e);
                }
            }
        }
        Ok(())
    }

    async fn sample_one(&mut self, summary: &ContainerSummary) -> Result<Option<ContainerSample>> {
        let Some(state) = self.runtime.inspect(&summary.id).await? else {
            return Ok(None);
        };
        let stats = self.runtime.stats(&summary.id).await?;
        let cpu_percent = self.cpu.observe(&summary.id, &stats);
        Ok(Some(build_sample(summary, &state, &stats, cpu_percent)))
    }

    async fn publish_sample(&self, sample: &ContainerSample) -> Result<()> {
        // Cache the latest sample regardless of anomalies; the Analyzer and
        // the UI both read it
        set_json(
            self.ctx.broker(),
            &keys::stats(&sample.container.id),
            sample,
            Some(Duration::from_secs(self.config.stats_ttl_seconds)),
        )
        .await?;

        let issues = detect_anomalies(sample, &self.config);
        if issues.is_empty() {
            return Ok(());
        }

        info!(
            container = %sample.container.name,
            issues = issues.len(),
            "anomalies detected"
        );
        let alert = HealthAlert::from_sample(sample, issues);
        self.ctx.publish(MessageKind::HealthAlert, &alert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemostat_broker::{Broker, MemoryBroker};
    use hemostat_common::envelope::channels;
    use hemostat_common::{AnomalyKind, ContainerStatus, Envelope, HealthStatus};
    use hemostat_runtime::{FakeRuntime, RawStats};

    fn setup() -> (MonitorAgent, Arc<MemoryBroker>, FakeRuntime) {
        let broker = Arc::new(MemoryBroker::new());
        let runtime = FakeRuntime::new();
        let agent = MonitorAgent::new(
            AgentContext::new(AGENT_NAME, broker.clone() as Arc<dyn Broker>),
            Arc::new(runtime.clone()),
            MonitorConfig::default(),
        );
        (agent, broker, runtime)
    }

    async fn alerts_on(broker: &MemoryBroker) -> Vec<HealthAlert> {
        broker
            .published_on(channels::HEALTH_ALERT)
            .await
            .iter()
            .map(|raw| Envelope::from_json(raw).unwrap().decode().unwrap())
            .collect()
    }

    fn busy_stats() -> RawStats {
        RawStats {
            cpu_total_ns: 1_000,
            system_cpu_ns: 10_000,
            online_cpus: 1,
            memory_limit_bytes: 1 << 30,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn first_cycle_emits_no_cpu_anomaly() {
        let (mut agent, broker, runtime) = setup();
        runtime.add_container("abc", "svc-a", "img");
        runtime.set_stats("abc", busy_stats());

        agent.cycle().await.unwrap();
        assert!(alerts_on(&broker).await.is_empty());

        // Second cycle: Δtotal 9_200 over Δsystem 10_000 → 92 %
        runtime.advance_cpu("abc", 9_200, 10_000);
        agent.cycle().await.unwrap();

        let alerts = alerts_on(&broker).await;
        assert_eq!(alerts.len(), 1);
        let issue = alerts[0].issue(AnomalyKind::HighCpu).unwrap();
        assert!((issue.actual.unwrap() - 92.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn lifecycle_anomalies_fire_on_first_cycle() {
        let (mut agent, broker, runtime) = setup();
        runtime.add_container("abc", "svc-a", "img");
        runtime.set_status("abc", ContainerStatus::Exited, Some(137));

        agent.cycle().await.unwrap();

        let alerts = alerts_on(&broker).await;
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].issue(AnomalyKind::NonZeroExit).is_some());
        assert_eq!(alerts[0].exit_code, Some(137));
    }

    #[tokio::test]
    async fn per_container_failures_do_not_abort_the_cycle() {
        let (mut agent, broker, runtime) = setup();
        runtime.add_container("bad", "svc-bad", "img");
        runtime.add_container("sick", "svc-sick", "img");
        runtime.fail_stats_for("bad");
        runtime.set_health("sick", HealthStatus::Unhealthy);

        agent.cycle().await.unwrap();

        let alerts = alerts_on(&broker).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].container.name, "svc-sick");
    }

    #[tokio::test]
    async fn unreachable_runtime_skips_the_cycle() {
        let (mut agent, broker, runtime) = setup();
        runtime.add_container("abc", "svc-a", "img");
        runtime.set_unreachable(true);

        assert!(agent.cycle().await.is_err());
        assert!(broker.published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn healthy_sample_is_cached_without_alerting() {
        let (mut agent, broker, runtime) = setup();
        runtime.add_container("abc", "svc-a", "img");

        agent.cycle().await.unwrap();

        assert!(alerts_on(&broker).await.is_empty());
        let cached = broker.get(&keys::stats("abc")).await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn reappearing_container_needs_two_fresh_samples() {
        let (mut agent, broker, runtime) = setup();
        runtime.add_container("abc", "svc-a", "img");
        runtime.set_stats("abc", busy_stats());
        agent.cycle().await.unwrap();

        runtime.remove_container("abc");
        agent.cycle().await.unwrap();

        runtime.add_container("abc", "svc-a", "img");
        runtime.set_stats(
            "abc",
            RawStats {
                cpu_total_ns: 100_000,
                system_cpu_ns: 100_000,
                online_cpus: 1,
                memory_limit_bytes: 1 << 30,
                ..Default::default()
            },
        );
        agent.cycle().await.unwrap();

        assert!(alerts_on(&broker).await.is_empty());
    }
}
