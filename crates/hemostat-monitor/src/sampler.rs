//! Sample derivation from raw runtime counters
//!
//! CPU percent needs two consecutive observations of the cumulative
//! counters; the first observation of a container yields no CPU value, and a
//! container that disappears starts over when it reappears.

use std::collections::HashMap;

use chrono::Utc;

use hemostat_common::{ContainerSample, SampleMetrics};
use hemostat_runtime::{ContainerState, ContainerSummary, RawStats};

#[derive(Debug, Clone, Copy)]
struct CpuPoint {
    cpu_total_ns: u64,
    system_cpu_ns: u64,
}

/// Tracks the previous CPU counters per container
#[derive(Debug, Default)]
pub struct CpuTracker {
    previous: HashMap<String, CpuPoint>,
}

impl CpuTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record this observation and return the CPU percentage over the
    /// interval since the previous one, if any.
    ///
    /// `cpu% = (Δcpu_total / Δsystem_cpu) × online_cpus × 100`
    pub fn observe(&mut self, container_id: &str, stats: &RawStats) -> Option<f64> {
        let point = CpuPoint {
            cpu_total_ns: stats.cpu_total_ns,
            system_cpu_ns: stats.system_cpu_ns,
        };
        let previous = self.previous.insert(container_id.to_string(), point)?;

        let delta_total = stats.cpu_total_ns.checked_sub(previous.cpu_total_ns)?;
        let delta_system = stats.system_cpu_ns.checked_sub(previous.system_cpu_ns)?;
        if delta_system == 0 {
            return None;
        }
        Some((delta_total as f64 / delta_system as f64) * stats.online_cpus as f64 * 100.0)
    }

    /// Drop state for containers that are no longer present, so a
    /// reappearing container is treated as unsampled again
    pub fn retain_live(&mut self, live_ids: &[&str]) {
        self.previous.retain(|id, _| live_ids.contains(&id.as_str()));
    }
}

/// Memory percent with page cache excluded: `(usage − inactive_file) / limit`
pub fn memory_percent(stats: &RawStats) -> f64 {
    if stats.memory_limit_bytes == 0 {
        return 0.0;
    }
    let used = stats
        .memory_usage_bytes
        .saturating_sub(stats.memory_inactive_file_bytes);
    (used as f64 / stats.memory_limit_bytes as f64 * 100.0).clamp(0.0, 100.0)
}

/// Assemble one immutable sample from a runtime observation
pub fn build_sample(
    summary: &ContainerSummary,
    state: &ContainerState,
    stats: &RawStats,
    cpu_percent: Option<f64>,
) -> ContainerSample {
    ContainerSample {
        container: hemostat_common::ContainerRef::new(
            summary.id.clone(),
            summary.name.clone(),
            summary.image.clone(),
        ),
        status: state.status,
        metrics: SampleMetrics {
            cpu_percent,
            memory_percent: memory_percent(stats),
            memory_bytes: stats
                .memory_usage_bytes
                .saturating_sub(stats.memory_inactive_file_bytes),
            memory_limit: stats.memory_limit_bytes,
            net_rx_bytes: stats.net_rx_bytes,
            net_tx_bytes: stats.net_tx_bytes,
            blkio_read_bytes: stats.blkio_read_bytes,
            blkio_write_bytes: stats.blkio_write_bytes,
        },
        health_status: state.health,
        exit_code: state.exit_code,
        restart_count: state.restart_count,
        sampled_at: Utc::now(),
    }
}
