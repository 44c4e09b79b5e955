//! Configuration for the HemoStat control plane
//!
//! All sections have serde defaults so a partial TOML file only needs to
//! name the values it overrides.

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffConfig;
use crate::error::{Error, Result};
use crate::types::{Action, AnomalyKind, Verdict};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub runtime: RuntimeConfig,
    pub monitor: MonitorConfig,
    pub analyzer: AnalyzerConfig,
    pub responder: ResponderConfig,
    pub alert: AlertConfig,
    pub shutdown: ShutdownConfig,
}

impl Config {
    /// Parse a TOML document, filling omitted sections with defaults
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Configuration(e.to_string()))
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Redis connection URL
    pub url: String,
    /// Namespace prefix applied to every key and channel
    pub key_prefix: String,
    /// Per-command deadline in milliseconds
    pub command_timeout_ms: u64,
    /// Reconnect schedule for the initial connect and pub/sub resubscription
    pub reconnect: BackoffConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "hemostat".to_string(),
            command_timeout_ms: 5_000,
            reconnect: BackoffConfig::default(),
        }
    }
}

/// Container runtime endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Engine API endpoint. Platform socket detection is out of scope; point
    /// this at a TCP endpoint or a socket proxy.
    pub endpoint: String,
    /// Per-request deadline for sampling calls in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:2375".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

/// Monitor agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sampling period in seconds
    pub poll_interval_seconds: u64,
    /// CPU anomaly gate in percent
    pub cpu_threshold: f64,
    /// Memory anomaly gate in percent
    pub memory_threshold: f64,
    /// Restart count above which the restart anomaly fires
    pub restart_count_threshold: u32,
    /// TTL for the per-container latest-sample cache in seconds
    pub stats_ttl_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            cpu_threshold: 85.0,
            memory_threshold: 80.0,
            restart_count_threshold: 5,
            stats_ttl_seconds: 300,
        }
    }
}

/// Analyzer agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Consult the model endpoint before the rule table
    pub model_enabled: bool,
    /// Fall back to the rule table when the model fails
    pub model_fallback_enabled: bool,
    /// Minimum decision confidence required to request actuation
    pub confidence_threshold: f64,
    pub model: ModelEndpointConfig,
    /// Classification rule table, evaluated in order with first match
    /// winning. Empty means the built-in table.
    pub rules: Vec<RuleConfig>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            model_enabled: false,
            model_fallback_enabled: true,
            confidence_threshold: 0.7,
            model: ModelEndpointConfig::default(),
            rules: Vec::new(),
        }
    }
}

/// One externalized classification rule. Rules are data so production
/// deployments can install richer tables without a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub kind: AnomalyKind,
    /// Inclusive lower bound on the anomaly's observed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_actual: Option<f64>,
    /// Inclusive upper bound on the anomaly's observed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_actual: Option<f64>,
    pub verdict: Verdict,
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelEndpointConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-alert classification deadline in milliseconds
    pub deadline_ms: u64,
}

impl Default for ModelEndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8085/v1/classify".to_string(),
            api_key: None,
            deadline_ms: 10_000,
        }
    }
}

/// Responder agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Accept requests and perform bookkeeping without touching the runtime
    pub dry_run: bool,
    /// Minimum gap between successful actions per container, in seconds
    pub cooldown_seconds: u64,
    /// Trailing window inspected by the circuit breaker, in seconds
    pub circuit_window_seconds: u64,
    /// Maximum attempts (successful or failed) per container per window
    pub max_retries_per_window: u32,
    /// Concurrent action bound across distinct containers
    pub max_parallel_actions: usize,
    /// Per-action runtime deadline in milliseconds
    pub action_deadline_ms: u64,
    /// Stop timeout handed to the runtime for restarts, in seconds
    pub stop_timeout_seconds: u64,
    /// Remedy command for the exec action; empty means exec is not applicable
    pub exec_command: Vec<String>,
    /// Audit list bound per container
    pub audit_max_entries: usize,
    /// Audit list TTL in seconds
    pub audit_ttl_seconds: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            cooldown_seconds: 300,
            circuit_window_seconds: 1_800,
            max_retries_per_window: 3,
            max_parallel_actions: 4,
            action_deadline_ms: 30_000,
            stop_timeout_seconds: 10,
            exec_command: Vec::new(),
            audit_max_entries: 100,
            audit_ttl_seconds: 86_400,
        }
    }
}

/// Alert agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Master switch for webhook delivery; persistence is unconditional
    pub notifications_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Notification-suppression window in seconds
    pub dedupe_ttl_seconds: u64,
    /// Bound for each events list
    pub max_events_per_kind: usize,
    /// TTL refreshed on every events-list append, in seconds
    pub events_ttl_seconds: u64,
    /// Per-attempt webhook deadline in milliseconds
    pub webhook_timeout_ms: u64,
    /// Delivery attempts before the notification is dropped
    pub webhook_attempts: u32,
    /// Base backoff between delivery attempts in milliseconds
    pub webhook_backoff_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            webhook_url: None,
            dedupe_ttl_seconds: 60,
            max_events_per_kind: 100,
            events_ttl_seconds: 3_600,
            webhook_timeout_ms: 5_000,
            webhook_attempts: 3,
            webhook_backoff_ms: 500,
        }
    }
}

/// Graceful-shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Grace given to in-flight handlers before workers are cancelled
    pub drain_deadline_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_deadline_ms: 10_000,
        }
    }
}
