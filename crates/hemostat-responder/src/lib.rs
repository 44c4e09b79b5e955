//! Responder agent
//!
//! Consumes `remediation_needed`, runs the safety guard chain (existence,
//! dry-run, cooldown, circuit breaker, single-writer lock), executes the
//! requested action with a bounded deadline, performs cooldown/circuit
//! bookkeeping and audit logging, and publishes exactly one
//! `remediation_complete` outcome per request.

pub mod actions;
pub mod agent;
pub mod safety;

pub use agent::ResponderAgent;
pub use safety::{cooldown_active, CircuitRing, CooldownRecord};
