//! Analyzer agent
//!
//! Consumes `health_alert`, classifies each alert as a real issue or a false
//! alarm, and publishes either `remediation_needed` (confidence-gated) or
//! `false_alarm`. Classification is polymorphic: a model-backed classifier
//! with a rule-table fallback, or the rule table alone.

pub mod agent;
pub mod classifier;
pub mod model;
pub mod rules;

pub use agent::AnalyzerAgent;
pub use classifier::Classify;
pub use model::ModelClassifier;
pub use rules::RuleClassifier;
