//! Action execution
//!
//! Maps the action vocabulary onto runtime calls, each bounded by the
//! configured action deadline. Runtime errors and timeouts become `failed`
//! executions; an action the surrounding deployment cannot perform becomes
//! `not_applicable`. Neither is fatal to the agent.

use std::time::Duration;

use tracing::{info, warn};

use hemostat_common::config::ResponderConfig;
use hemostat_common::{Action, ActionResult, Error, Result};
use hemostat_runtime::ContainerRuntime;

/// Outcome of one bounded execution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub result: ActionResult,
    pub error: Option<String>,
}

impl Execution {
    fn success() -> Self {
        Self {
            result: ActionResult::Success,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            result: ActionResult::Failed,
            error: Some(error.into()),
        }
    }

    fn not_applicable(detail: impl Into<String>) -> Self {
        Self {
            result: ActionResult::NotApplicable,
            error: Some(detail.into()),
        }
    }
}

/// Execute one action against the runtime, bounded by the action deadline
pub async fn execute(
    runtime: &dyn ContainerRuntime,
    config: &ResponderConfig,
    container_id: &str,
    action: Action,
) -> Execution {
    let deadline = Duration::from_millis(config.action_deadline_ms);
    match tokio::time::timeout(deadline, dispatch(runtime, config, container_id, action)).await {
        Ok(Ok(execution)) => execution,
        Ok(Err(e)) => {
            warn!(
                container = container_id,
                action = action.as_str(),
                "action failed: {}",
                e
            );
            Execution::failed(format!("{}: {}", e.category(), e))
        }
        Err(_) => {
            warn!(
                container = container_id,
                action = action.as_str(),
                "action exceeded deadline"
            );
            Execution::failed("timeout")
        }
    }
}

async fn dispatch(
    runtime: &dyn ContainerRuntime,
    config: &ResponderConfig,
    container_id: &str,
    action: Action,
) -> Result<Execution> {
    match action {
        Action::Restart => {
            runtime
                .restart(
                    container_id,
                    Duration::from_secs(config.stop_timeout_seconds),
                )
                .await?;
            info!(container = container_id, "container restarted");
            Ok(Execution::success())
        }
        Action::ScaleUp => {
            if runtime.scale_up(container_id).await? {
                info!(container = container_id, "scaled up");
                Ok(Execution::success())
            } else {
                Ok(Execution::not_applicable(
                    "no orchestrator interface available",
                ))
            }
        }
        Action::Cleanup => {
            let report = runtime.cleanup().await?;
            info!(
                removed = report.containers_removed,
                reclaimed_bytes = report.space_reclaimed_bytes,
                "cleanup completed"
            );
            Ok(Execution::success())
        }
        Action::Exec => {
            if config.exec_command.is_empty() {
                return Ok(Execution::not_applicable("no remedy command configured"));
            }
            let exit_code = runtime.exec(container_id, &config.exec_command).await?;
            if exit_code == 0 {
                Ok(Execution::success())
            } else {
                Ok(Execution::failed(format!(
                    "remedy command exited {exit_code}"
                )))
            }
        }
        Action::None => Err(Error::Internal(
            "action 'none' reached execution".to_string(),
        )),
    }
}
