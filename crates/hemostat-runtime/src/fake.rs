//! Scriptable runtime double
//!
//! In-memory implementation of the runtime trait with knobs for failure
//! injection. Used by agent tests and by simulated deployments.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hemostat_common::{ContainerStatus, Error, HealthStatus, Result};

use crate::{CleanupReport, ContainerRuntime, ContainerState, ContainerSummary, RawStats};

#[derive(Debug, Clone)]
struct FakeContainer {
    summary: ContainerSummary,
    state: ContainerState,
    stats: RawStats,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    unreachable: bool,
    stats_failures: HashSet<String>,
    restart_error: Option<String>,
    restart_delay: Option<Duration>,
    exec_exit_code: i64,
    scale_up_available: bool,
    restarted: Vec<String>,
    execs: Vec<(String, Vec<String>)>,
    cleanups: u32,
}

/// In-memory container runtime for tests and simulation
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a running, healthy container with zeroed counters
    pub fn add_container(&self, id: &str, name: &str, image: &str) {
        let container = FakeContainer {
            summary: ContainerSummary {
                id: id.to_string(),
                name: name.to_string(),
                image: image.to_string(),
                status: ContainerStatus::Running,
            },
            state: ContainerState {
                status: ContainerStatus::Running,
                health: HealthStatus::None,
                exit_code: None,
                restart_count: 0,
            },
            stats: RawStats {
                online_cpus: 1,
                memory_limit_bytes: 1 << 30,
                ..Default::default()
            },
        };
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(id.to_string(), container);
    }

    pub fn remove_container(&self, id: &str) {
        self.state.lock().unwrap().containers.remove(id);
    }

    pub fn set_status(&self, id: &str, status: ContainerStatus, exit_code: Option<i64>) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.summary.status = status;
            c.state.status = status;
            c.state.exit_code = exit_code;
        }
    }

    pub fn set_health(&self, id: &str, health: HealthStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.state.health = health;
        }
    }

    pub fn set_restart_count(&self, id: &str, count: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.state.restart_count = count;
        }
    }

    pub fn set_stats(&self, id: &str, stats: RawStats) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.stats = stats;
        }
    }

    /// Advance the cumulative CPU counters, as another poll interval would
    pub fn advance_cpu(&self, id: &str, delta_total_ns: u64, delta_system_ns: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.stats.cpu_total_ns += delta_total_ns;
            c.stats.system_cpu_ns += delta_system_ns;
        }
    }

    pub fn set_memory(&self, id: &str, usage: u64, inactive_file: u64, limit: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(c) = state.containers.get_mut(id) {
            c.stats.memory_usage_bytes = usage;
            c.stats.memory_inactive_file_bytes = inactive_file;
            c.stats.memory_limit_bytes = limit;
        }
    }

    /// Make every call fail, as if the engine API were down
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    /// Make stats reads fail for one container only
    pub fn fail_stats_for(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .stats_failures
            .insert(id.to_string());
    }

    pub fn set_restart_error(&self, message: Option<&str>) {
        self.state.lock().unwrap().restart_error = message.map(str::to_string);
    }

    /// Delay restarts, for exercising the action deadline
    pub fn set_restart_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().restart_delay = delay;
    }

    pub fn set_exec_exit_code(&self, code: i64) {
        self.state.lock().unwrap().exec_exit_code = code;
    }

    pub fn set_scale_up_available(&self, available: bool) {
        self.state.lock().unwrap().scale_up_available = available;
    }

    pub fn restarted(&self) -> Vec<String> {
        self.state.lock().unwrap().restarted.clone()
    }

    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn cleanups(&self) -> u32 {
        self.state.lock().unwrap().cleanups
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state.lock().unwrap().unreachable {
            Err(Error::Runtime("engine API unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .values()
            .map(|c| c.summary.clone())
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerState>> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.state.clone()))
    }

    async fn stats(&self, id: &str) -> Result<RawStats> {
        self.check_reachable()?;
        let state = self.state.lock().unwrap();
        if state.stats_failures.contains(id) {
            return Err(Error::Runtime(format!("stats unavailable for {id}")));
        }
        state
            .containers
            .get(id)
            .map(|c| c.stats)
            .ok_or_else(|| Error::Runtime(format!("no such container: {id}")))
    }

    async fn restart(&self, id: &str, _stop_timeout: Duration) -> Result<()> {
        self.check_reachable()?;
        let delay = self.state.lock().unwrap().restart_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.restart_error {
            return Err(Error::Runtime(message.clone()));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::Runtime(format!("no such container: {id}")))?;
        container.summary.status = ContainerStatus::Running;
        container.state.status = ContainerStatus::Running;
        container.state.exit_code = None;
        container.state.restart_count += 1;
        state.restarted.push(id.to_string());
        Ok(())
    }

    async fn scale_up(&self, _id: &str) -> Result<bool> {
        self.check_reachable()?;
        Ok(self.state.lock().unwrap().scale_up_available)
    }

    async fn cleanup(&self) -> Result<CleanupReport> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        state.cleanups += 1;
        let stopped: Vec<String> = state
            .containers
            .iter()
            .filter(|(_, c)| c.state.status == ContainerStatus::Exited)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stopped {
            state.containers.remove(id);
        }
        Ok(CleanupReport {
            containers_removed: stopped.len() as u32,
            space_reclaimed_bytes: 0,
        })
    }

    async fn exec(&self, id: &str, command: &[String]) -> Result<i64> {
        self.check_reachable()?;
        let mut state = self.state.lock().unwrap();
        if !state.containers.contains_key(id) {
            return Err(Error::Runtime(format!("no such container: {id}")));
        }
        state.execs.push((id.to_string(), command.to_vec()));
        Ok(state.exec_exit_code)
    }
}
