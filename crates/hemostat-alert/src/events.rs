//! Bounded event-list persistence
//!
//! Each event lands in its per-kind list and the unified timeline, both
//! trimmed to the configured cap with their TTL refreshed on every append.
//! Persistence is unconditional and always precedes delivery.

use std::time::Duration;

use hemostat_broker::{push_json, Broker};
use hemostat_common::config::AlertConfig;
use hemostat_common::{keys, Envelope, EventRecord, Result};

/// Build the UI record for one received envelope
pub fn record_for(envelope: &Envelope) -> EventRecord {
    EventRecord {
        timestamp: envelope.timestamp,
        publisher: envelope.agent.clone(),
        kind: envelope.kind,
        payload: envelope.data.clone(),
    }
}

/// Append to `events:<kind>` and `events:all`
pub async fn persist(broker: &dyn Broker, config: &AlertConfig, record: &EventRecord) -> Result<()> {
    let ttl = Duration::from_secs(config.events_ttl_seconds);
    push_json(
        broker,
        &keys::events(record.kind.as_str()),
        record,
        config.max_events_per_kind,
        ttl,
    )
    .await?;
    push_json(
        broker,
        keys::EVENTS_ALL,
        record,
        config.max_events_per_kind,
        ttl,
    )
    .await
}
