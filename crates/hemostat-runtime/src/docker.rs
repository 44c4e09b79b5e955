//! Engine API client
//!
//! Speaks the Docker Engine HTTP API (v1.41 subset) over the configured
//! endpoint. Socket/platform detection is a deployment concern; point the
//! endpoint at a TCP listener or a socket proxy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use hemostat_common::config::RuntimeConfig;
use hemostat_common::{ContainerStatus, Error, HealthStatus, Result};

use crate::{CleanupReport, ContainerRuntime, ContainerState, ContainerSummary, RawStats};

/// HTTP client for the container engine
pub struct DockerRuntime {
    client: Client,
    endpoint: String,
}

impl DockerRuntime {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("hemostat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Runtime(format!("failed to create engine client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn engine_error(response: reqwest::Response, context: &str) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Error::Runtime(format!("{context}: engine returned {status}: {body}"))
    }
}

#[derive(Debug, Deserialize)]
struct ListedContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct InspectedContainer {
    #[serde(rename = "RestartCount", default)]
    restart_count: u32,
    #[serde(rename = "State")]
    state: InspectedState,
}

#[derive(Debug, Deserialize)]
struct InspectedState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
    #[serde(rename = "Health")]
    health: Option<InspectedHealth>,
}

#[derive(Debug, Deserialize)]
struct InspectedHealth {
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct StatsDocument {
    #[serde(rename = "cpu_stats", default)]
    cpu_stats: CpuStats,
    #[serde(rename = "memory_stats", default)]
    memory_stats: MemoryStats,
    #[serde(rename = "networks", default)]
    networks: HashMap<String, NetworkStats>,
    #[serde(rename = "blkio_stats", default)]
    blkio_stats: BlkioStats,
}

#[derive(Debug, Default, Deserialize)]
struct CpuStats {
    #[serde(rename = "cpu_usage", default)]
    cpu_usage: CpuUsage,
    #[serde(rename = "system_cpu_usage", default)]
    system_cpu_usage: u64,
    #[serde(rename = "online_cpus", default)]
    online_cpus: u32,
}

#[derive(Debug, Default, Deserialize)]
struct CpuUsage {
    #[serde(rename = "total_usage", default)]
    total_usage: u64,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryStats {
    #[serde(default)]
    usage: u64,
    #[serde(default)]
    limit: u64,
    #[serde(default)]
    stats: MemoryDetail,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryDetail {
    #[serde(default)]
    inactive_file: u64,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkStats {
    #[serde(default)]
    rx_bytes: u64,
    #[serde(default)]
    tx_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
struct BlkioStats {
    #[serde(rename = "io_service_bytes_recursive", default)]
    io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Deserialize)]
struct BlkioEntry {
    #[serde(default)]
    op: String,
    #[serde(default)]
    value: u64,
}

#[derive(Debug, Deserialize)]
struct ExecCreated {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ExecInspect {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
}

#[derive(Debug, Default, Deserialize)]
struct PruneReport {
    #[serde(rename = "ContainersDeleted", default)]
    containers_deleted: Option<Vec<String>>,
    #[serde(rename = "SpaceReclaimed", default)]
    space_reclaimed: u64,
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let response = self
            .client
            .get(self.url("/containers/json"))
            .query(&[("all", "true")])
            .send()
            .await
            .map_err(|e| Error::Runtime(format!("list containers: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::engine_error(response, "list containers").await);
        }
        let listed: Vec<ListedContainer> = response
            .json()
            .await
            .map_err(|e| Error::Runtime(format!("list containers: {e}")))?;

        Ok(listed
            .into_iter()
            .map(|c| ContainerSummary {
                name: c
                    .names
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| c.id.clone()),
                status: ContainerStatus::parse(&c.state),
                image: c.image,
                id: c.id,
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{id}/json")))
            .send()
            .await
            .map_err(|e| Error::Runtime(format!("inspect {id}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::engine_error(response, "inspect").await);
        }
        let inspected: InspectedContainer = response
            .json()
            .await
            .map_err(|e| Error::Runtime(format!("inspect {id}: {e}")))?;

        let status = ContainerStatus::parse(&inspected.state.status);
        Ok(Some(ContainerState {
            status,
            health: inspected
                .state
                .health
                .map(|h| HealthStatus::parse(&h.status))
                .unwrap_or(HealthStatus::None),
            exit_code: (status == ContainerStatus::Exited).then_some(inspected.state.exit_code),
            restart_count: inspected.restart_count,
        }))
    }

    async fn stats(&self, id: &str) -> Result<RawStats> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{id}/stats")))
            .query(&[("stream", "false")])
            .send()
            .await
            .map_err(|e| Error::Runtime(format!("stats {id}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::engine_error(response, "stats").await);
        }
        let document: StatsDocument = response
            .json()
            .await
            .map_err(|e| Error::Runtime(format!("stats {id}: {e}")))?;

        let (mut blkio_read, mut blkio_write) = (0u64, 0u64);
        for entry in document
            .blkio_stats
            .io_service_bytes_recursive
            .unwrap_or_default()
        {
            // Op casing differs between cgroup v1 and v2 engines
            match entry.op.to_ascii_lowercase().as_str() {
                "read" => blkio_read += entry.value,
                "write" => blkio_write += entry.value,
                _ => {}
            }
        }

        Ok(RawStats {
            cpu_total_ns: document.cpu_stats.cpu_usage.total_usage,
            system_cpu_ns: document.cpu_stats.system_cpu_usage,
            online_cpus: document.cpu_stats.online_cpus.max(1),
            memory_usage_bytes: document.memory_stats.usage,
            memory_inactive_file_bytes: document.memory_stats.stats.inactive_file,
            memory_limit_bytes: document.memory_stats.limit,
            net_rx_bytes: document.networks.values().map(|n| n.rx_bytes).sum(),
            net_tx_bytes: document.networks.values().map(|n| n.tx_bytes).sum(),
            blkio_read_bytes: blkio_read,
            blkio_write_bytes: blkio_write,
        })
    }

    async fn restart(&self, id: &str, stop_timeout: Duration) -> Result<()> {
        debug!("restarting container {}", id);
        let response = self
            .client
            .post(self.url(&format!("/containers/{id}/restart")))
            .query(&[("t", stop_timeout.as_secs().to_string())])
            .send()
            .await
            .map_err(|e| Error::Runtime(format!("restart {id}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::engine_error(response, "restart").await);
        }
        Ok(())
    }

    async fn scale_up(&self, id: &str) -> Result<bool> {
        // A standalone engine has no replica interface
        debug!("scale_up requested for {} without an orchestrator", id);
        Ok(false)
    }

    async fn cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for path in ["/containers/prune", "/images/prune"] {
            let response = self
                .client
                .post(self.url(path))
                .send()
                .await
                .map_err(|e| Error::Runtime(format!("prune {path}: {e}")))?;
            if !response.status().is_success() {
                return Err(Self::engine_error(response, "prune").await);
            }
            let pruned: PruneReport = response
                .json()
                .await
                .map_err(|e| Error::Runtime(format!("prune {path}: {e}")))?;
            report.containers_removed += pruned
                .containers_deleted
                .map(|d| d.len() as u32)
                .unwrap_or(0);
            report.space_reclaimed_bytes += pruned.space_reclaimed;
        }
        Ok(report)
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<i64> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{id}/exec")))
            .json(&serde_json::json!({
                "AttachStdout": false,
                "AttachStderr": false,
                "Cmd": command,
            }))
            .send()
            .await
            .map_err(|e| Error::Runtime(format!("exec create {id}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::engine_error(response, "exec create").await);
        }
        let created: ExecCreated = response
            .json()
            .await
            .map_err(|e| Error::Runtime(format!("exec create {id}: {e}")))?;

        let response = self
            .client
            .post(self.url(&format!("/exec/{}/start", created.id)))
            .json(&serde_json::json!({"Detach": true}))
            .send()
            .await
            .map_err(|e| Error::Runtime(format!("exec start {id}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::engine_error(response, "exec start").await);
        }

        // The action deadline above this call bounds the poll loop
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let response = self
                .client
                .get(self.url(&format!("/exec/{}/json", created.id)))
                .send()
                .await
                .map_err(|e| Error::Runtime(format!("exec inspect {id}: {e}")))?;
            if !response.status().is_success() {
                return Err(Self::engine_error(response, "exec inspect").await);
            }
            let inspect: ExecInspect = response
                .json()
                .await
                .map_err(|e| Error::Runtime(format!("exec inspect {id}: {e}")))?;
            if !inspect.running {
                if inspect.exit_code != 0 {
                    warn!("remedy command in {} exited {}", id, inspect.exit_code);
                }
                return Ok(inspect.exit_code);
            }
        }
    }
}
