//! HemoStat daemon wiring
//!
//! Constructs the four agents over one broker and supervises them: a fatal
//! agent exit (broker reconnect budget spent) takes the process down; a
//! shutdown signal drains in-flight handlers to the configured deadline and
//! then cancels what remains.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use hemostat_alert::AlertAgent;
use hemostat_analyzer::AnalyzerAgent;
use hemostat_broker::{run_dispatcher, AgentContext, Broker, MessageHandler};
use hemostat_common::envelope::channels;
use hemostat_common::{Config, Error, Result};
use hemostat_monitor::MonitorAgent;
use hemostat_responder::ResponderAgent;
use hemostat_runtime::ContainerRuntime;

/// The assembled control plane
pub struct HemoStat {
    config: Config,
    broker: Arc<dyn Broker>,
    runtime: Arc<dyn ContainerRuntime>,
}

type Completion = (&'static str, Result<()>);
type AgentFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

impl HemoStat {
    pub fn new(config: Config, broker: Arc<dyn Broker>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            broker,
            runtime,
        }
    }

    /// Run all agents until shutdown or a fatal failure
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(16);
        let mut abort_handles: Vec<AbortHandle> = Vec::new();
        let mut running = 0usize;

        let spawn_agent = |name: &'static str,
                               fut: AgentFuture,
                               abort_handles: &mut Vec<AbortHandle>,
                               running: &mut usize| {
            let tx = done_tx.clone();
            let handle = tokio::spawn(async move {
                let result = fut.await;
                let _ = tx.send((name, result)).await;
            });
            abort_handles.push(handle.abort_handle());
            *running += 1;
        };

        // Monitor: tick loop, no subscriptions
        let monitor = MonitorAgent::new(
            AgentContext::new(hemostat_monitor::agent::AGENT_NAME, self.broker.clone()),
            self.runtime.clone(),
            self.config.monitor.clone(),
        );
        spawn_agent(
            "monitor",
            Box::pin(monitor.run(shutdown.clone())),
            &mut abort_handles,
            &mut running,
        );

        // Analyzer: health_alert dispatcher
        let analyzer_ctx =
            AgentContext::new(hemostat_analyzer::agent::AGENT_NAME, self.broker.clone());
        let analyzer: Arc<dyn MessageHandler> = Arc::new(AnalyzerAgent::from_config(
            analyzer_ctx.clone(),
            self.config.analyzer.clone(),
        )?);
        spawn_agent(
            "analyzer",
            Box::pin(dispatch(
                analyzer_ctx,
                channels::HEALTH_ALERT,
                analyzer,
                shutdown.clone(),
            )),
            &mut abort_handles,
            &mut running,
        );

        // Responder: remediation_needed dispatcher plus its worker pool
        let responder_ctx =
            AgentContext::new(hemostat_responder::agent::AGENT_NAME, self.broker.clone());
        let (responder, workers) = ResponderAgent::spawn(
            responder_ctx.clone(),
            self.runtime.clone(),
            self.config.responder.clone(),
        );
        spawn_agent(
            "responder",
            Box::pin(dispatch(
                responder_ctx,
                channels::REMEDIATION_NEEDED,
                responder as Arc<dyn MessageHandler>,
                shutdown.clone(),
            )),
            &mut abort_handles,
            &mut running,
        );
        for worker in workers {
            abort_handles.push(worker.abort_handle());
            let tx = done_tx.clone();
            let watcher = tokio::spawn(async move {
                let result = worker
                    .await
                    .map_err(|e| Error::Internal(format!("responder worker: {e}")));
                let _ = tx.send(("responder-worker", result)).await;
            });
            abort_handles.push(watcher.abort_handle());
            running += 1;
        }

        // Alert: one agent behind both event channels
        let alert_ctx = AgentContext::new(hemostat_alert::agent::AGENT_NAME, self.broker.clone());
        let alert: Arc<dyn MessageHandler> =
            Arc::new(AlertAgent::new(alert_ctx.clone(), self.config.alert.clone())?);
        for channel in [channels::REMEDIATION_COMPLETE, channels::FALSE_ALARM] {
            spawn_agent(
                if channel == channels::REMEDIATION_COMPLETE {
                    "alert:remediation_complete"
                } else {
                    "alert:false_alarm"
                },
                Box::pin(dispatch(
                    alert_ctx.clone(),
                    channel,
                    alert.clone(),
                    shutdown.clone(),
                )),
                &mut abort_handles,
                &mut running,
            );
        }
        drop(done_tx);

        info!("all agents started");

        // Supervise until shutdown; any completion before that is trouble
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                completion = done_rx.recv() => match completion {
                    Some((name, Err(e))) => {
                        error!(agent = name, "agent failed fatally: {}", e);
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        return Err(e);
                    }
                    Some((name, Ok(()))) => {
                        warn!(agent = name, "agent stopped unexpectedly");
                        running = running.saturating_sub(1);
                    }
                    None => {
                        return Err(Error::Internal("all agents stopped".to_string()));
                    }
                }
            }
        }

        // Drain to the deadline, then cancel whatever is left
        info!("draining agents");
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.shutdown.drain_deadline_ms);
        while running > 0 {
            match tokio::time::timeout_at(deadline, done_rx.recv()).await {
                Ok(Some((name, result))) => {
                    running -= 1;
                    match result {
                        Ok(()) => info!(agent = name, "agent stopped"),
                        Err(e) => warn!(agent = name, "agent stopped with error: {}", e),
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("drain deadline exceeded, cancelling {} tasks", running);
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        info!("shutdown complete");
        Ok(())
    }
}

async fn dispatch(
    ctx: AgentContext,
    channel: &'static str,
    handler: Arc<dyn MessageHandler>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    run_dispatcher(&ctx, channel, handler, shutdown).await
}
