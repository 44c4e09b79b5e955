//! Cooldown and circuit-breaker state
//!
//! Both live in the keyed store under Responder ownership; these are the
//! pure evaluation helpers. The cooldown compares elapsed time strictly:
//! exactly at the boundary the action is allowed. The circuit counts every
//! attempt, successful or failed, inside the trailing window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hemostat_common::Action;

/// Last actuation per container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownRecord {
    pub last_action_at: DateTime<Utc>,
    pub last_action: Action,
}

/// True while the cooldown window since the last action is still open.
/// `elapsed == cooldown` is outside the window.
pub fn cooldown_active(record: &CooldownRecord, now: DateTime<Utc>, cooldown: Duration) -> bool {
    let window = chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::zero());
    now.signed_duration_since(record.last_action_at) < window
}

/// Action timestamps inside the trailing circuit window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircuitRing(pub Vec<DateTime<Utc>>);

impl CircuitRing {
    /// Drop entries older than the trailing window
    pub fn trim(&mut self, now: DateTime<Utc>, window: Duration) {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        self.0.retain(|t| now.signed_duration_since(*t) <= window);
    }

    /// Open exactly at the retry bound: `len >= max` rejects
    pub fn is_open(&self, max_retries_per_window: u32) -> bool {
        self.0.len() as u32 >= max_retries_per_window
    }

    pub fn record(&mut self, at: DateTime<Utc>) {
        self.0.push(at);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
