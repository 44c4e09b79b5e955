//! Container runtime interface for HemoStat
//!
//! The runtime is an external collaborator behind a small capability trait:
//! the Monitor samples through it and the Responder actuates through it.
//! `DockerRuntime` speaks the Engine HTTP API; `FakeRuntime` is a scriptable
//! double for tests and simulated deployments.

pub mod docker;
pub mod fake;

use std::time::Duration;

use async_trait::async_trait;

use hemostat_common::{ContainerStatus, HealthStatus, Result};

pub use docker::DockerRuntime;
pub use fake::FakeRuntime;

/// One entry from container enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
}

/// Lifecycle detail for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub status: ContainerStatus,
    pub health: HealthStatus,
    /// Present only for exited containers
    pub exit_code: Option<i64>,
    pub restart_count: u32,
}

/// Raw cumulative counters from one stats read. CPU and memory derivations
/// belong to the Monitor, not the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStats {
    pub cpu_total_ns: u64,
    pub system_cpu_ns: u64,
    pub online_cpus: u32,
    pub memory_usage_bytes: u64,
    pub memory_inactive_file_bytes: u64,
    pub memory_limit_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub blkio_read_bytes: u64,
    pub blkio_write_bytes: u64,
}

/// Result of a cleanup action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub containers_removed: u32,
    pub space_reclaimed_bytes: u64,
}

/// Capability trait over the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Enumerate all containers, including stopped ones
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Lifecycle detail; Ok(None) when the identity does not resolve
    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>>;

    /// One raw stats observation
    async fn stats(&self, id: &str) -> Result<RawStats>;

    /// Stop then start the container, bounded by the stop timeout
    async fn restart(&self, id: &str, stop_timeout: Duration) -> Result<()>;

    /// Increase replica count where an orchestrator interface exists;
    /// Ok(false) when none is available
    async fn scale_up(&self, id: &str) -> Result<bool>;

    /// Remove stopped containers and prune unused resources
    async fn cleanup(&self) -> Result<CleanupReport>;

    /// Run a remedy command inside the container; returns its exit code
    async fn exec(&self, id: &str, command: &[String]) -> Result<i64>;
}
