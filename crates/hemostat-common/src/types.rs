//! Domain model shared by all HemoStat agents
//!
//! Every shape here crosses the broker as JSON, so field names are part of
//! the wire contract and must stay stable across agent versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a container as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
    pub image: String,
}

impl ContainerRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: image.into(),
        }
    }

    /// Short id for log fields (runtime ids are long hex strings)
    pub fn short_id(&self) -> &str {
        let len = self.id.len().min(12);
        &self.id[..len]
    }
}

/// Container lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Exited,
    Restarting,
    Paused,
    Dead,
    Unknown,
}

impl ContainerStatus {
    /// Parse a runtime-reported status string, mapping anything novel to Unknown
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => ContainerStatus::Running,
            "exited" => ContainerStatus::Exited,
            "restarting" => ContainerStatus::Restarting,
            "paused" => ContainerStatus::Paused,
            "dead" => ContainerStatus::Dead,
            _ => ContainerStatus::Unknown,
        }
    }
}

/// Liveness as reported by the container's health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Starting,
    None,
}

impl HealthStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "healthy" => HealthStatus::Healthy,
            "unhealthy" => HealthStatus::Unhealthy,
            "starting" => HealthStatus::Starting,
            _ => HealthStatus::None,
        }
    }
}

/// Resource gauges and cumulative counters for one observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetrics {
    /// CPU percent over the previous poll interval. Absent on the first
    /// observation of a container (the delta is undefined).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    pub memory_percent: f64,
    pub memory_bytes: u64,
    pub memory_limit: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub blkio_read_bytes: u64,
    pub blkio_write_bytes: u64,
}

impl Default for SampleMetrics {
    fn default() -> Self {
        Self {
            cpu_percent: None,
            memory_percent: 0.0,
            memory_bytes: 0,
            memory_limit: 0,
            net_rx_bytes: 0,
            net_tx_bytes: 0,
            blkio_read_bytes: 0,
            blkio_write_bytes: 0,
        }
    }
}

/// One sampling observation of one container. Created at each poll and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSample {
    pub container: ContainerRef,
    pub status: ContainerStatus,
    pub metrics: SampleMetrics,
    pub health_status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub restart_count: u32,
    pub sampled_at: DateTime<Utc>,
}

/// Kinds of deviation the Monitor can attach to a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighCpu,
    HighMemory,
    UnhealthyStatus,
    NonZeroExit,
    ExcessiveRestarts,
}

/// Anomaly severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

/// A labeled deviation attached to a container sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    /// Configured threshold that was breached, where one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Observed value that breached it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<f64>,
}

/// Monitor → Analyzer message: a sample with its non-empty anomaly list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub container: ContainerRef,
    pub issues: Vec<Anomaly>,
    pub metrics: SampleMetrics,
    pub status: ContainerStatus,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    pub health_status: HealthStatus,
}

impl HealthAlert {
    pub fn from_sample(sample: &ContainerSample, issues: Vec<Anomaly>) -> Self {
        Self {
            container: sample.container.clone(),
            issues,
            metrics: sample.metrics.clone(),
            status: sample.status,
            restart_count: sample.restart_count,
            exit_code: sample.exit_code,
            health_status: sample.health_status,
        }
    }

    /// Highest-severity anomaly of a given kind, if present
    pub fn issue(&self, kind: AnomalyKind) -> Option<&Anomaly> {
        self.issues
            .iter()
            .filter(|a| a.kind == kind)
            .max_by_key(|a| a.severity)
    }
}

/// Analyzer classification verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    RealIssue,
    FalseAlarm,
}

/// Remediation action vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Restart,
    ScaleUp,
    Cleanup,
    Exec,
    None,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Restart => "restart",
            Action::ScaleUp => "scale_up",
            Action::Cleanup => "cleanup",
            Action::Exec => "exec",
            Action::None => "none",
        }
    }
}

/// Which classifier produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    Model,
    Rule,
}

/// Analyzer's classification of a health alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
    pub analysis_method: AnalysisMethod,
}

impl Decision {
    pub fn false_alarm(reason: impl Into<String>, confidence: f64, method: AnalysisMethod) -> Self {
        Self {
            verdict: Verdict::FalseAlarm,
            action: Action::None,
            confidence,
            reason: reason.into(),
            analysis_method: method,
        }
    }
}

/// Analyzer → Responder message, derived from a gated real-issue decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationRequest {
    pub container: ContainerRef,
    pub action: Action,
    pub reason: String,
    pub confidence: f64,
    pub metrics: SampleMetrics,
}

/// Result of one remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResult {
    Success,
    Failed,
    Rejected,
    NotApplicable,
}

impl ActionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionResult::Success => "success",
            ActionResult::Failed => "failed",
            ActionResult::Rejected => "rejected",
            ActionResult::NotApplicable => "not_applicable",
        }
    }
}

/// Why a request was rejected before touching the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    CooldownActive,
    CircuitOpen,
    DryRunSkipped,
    UnknownContainer,
    UnsupportedAction,
}

/// Responder → Alert message: the single outcome of a remediation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub container: ContainerRef,
    pub action: Action,
    pub result: ActionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempt: u32,
}

/// Analyzer → Alert message for alerts that did not warrant actuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FalseAlarm {
    pub container: ContainerRef,
    pub reason: String,
    pub confidence: f64,
    pub analysis_method: AnalysisMethod,
}

/// Wrapper placed in the bounded per-kind event lists for UI consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub publisher: String,
    pub kind: crate::envelope::MessageKind,
    pub payload: serde_json::Value,
}
