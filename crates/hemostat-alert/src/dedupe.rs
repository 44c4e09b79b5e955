//! Notification deduplication
//!
//! Near-duplicate notifications are grouped by a stable digest of the
//! container, the event kind, its action-or-reason discriminator, and the
//! minute bucket of the event timestamp. The digest keys a set-if-absent
//! sentinel in the store; only the winner delivers. Suppression applies to
//! notification side effects only, never to persistence.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use hemostat_common::MessageKind;

/// Stable digest for one notification's dedup bucket
pub fn dedupe_digest(
    container_id: &str,
    kind: MessageKind,
    discriminator: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let minute_bucket = timestamp.timestamp().div_euclid(60);
    let mut hasher = Sha256::new();
    hasher.update(container_id.as_bytes());
    hasher.update([0]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(discriminator.as_bytes());
    hasher.update([0]);
    hasher.update(minute_bucket.to_be_bytes());
    let digest = hasher.finalize();
    // 16 bytes of hex is plenty for a 60-second sentinel namespace
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
