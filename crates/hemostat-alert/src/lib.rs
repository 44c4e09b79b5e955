//! Alert agent
//!
//! Consumes `remediation_complete` and `false_alarm`. Every event is
//! persisted to the bounded UI lists first, unconditionally; webhook
//! delivery happens only afterwards, gated by the master switch and the
//! minute-bucket deduplication sentinel. Delivery failures never propagate
//! back into the pipeline.

pub mod agent;
pub mod dedupe;
pub mod events;
pub mod notifier;

pub use agent::AlertAgent;
pub use notifier::{Notification, NotificationTag, WebhookNotifier};
