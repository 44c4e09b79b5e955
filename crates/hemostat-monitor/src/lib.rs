//! Monitor agent
//!
//! Periodically enumerates containers, samples each one, detects anomalies
//! against configured thresholds, and publishes a `health_alert` for every
//! container with a non-empty anomaly set. Also maintains the latest-sample
//! cache consumed by the Analyzer and the operator UI.

pub mod agent;
pub mod anomaly;
pub mod sampler;

pub use agent::MonitorAgent;
pub use anomaly::detect_anomalies;
pub use sampler::CpuTracker;
