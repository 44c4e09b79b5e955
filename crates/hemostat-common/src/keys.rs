//! Keyed-store layout
//!
//! Logical key names for the shared store. The broker applies the
//! `hemostat:` namespace prefix, so these stay unprefixed here. Each key
//! family has exactly one writing agent; everyone else is read-only.

/// Latest sample for UI consumption. Written by Monitor.
pub fn stats(container_id: &str) -> String {
    format!("stats:{container_id}")
}

/// Recent events of one kind, bounded. Written by Alert.
pub fn events(kind: &str) -> String {
    format!("events:{kind}")
}

/// Unified event timeline, bounded. Written by Alert.
pub const EVENTS_ALL: &str = "events:all";

/// Last successful action per container. Written by Responder.
pub fn cooldown(container_id: &str) -> String {
    format!("cooldown:{container_id}")
}

/// Action timestamps in the trailing circuit window. Written by Responder.
pub fn circuit(container_id: &str) -> String {
    format!("circuit:{container_id}")
}

/// Single-writer guard for in-flight remediation. Written by Responder.
pub fn lock(container_id: &str) -> String {
    format!("lock:{container_id}")
}

/// Bounded audit trail per container. Written by Responder.
pub fn audit(container_id: &str) -> String {
    format!("audit:{container_id}")
}

/// Notification-suppression sentinel. Written by Alert.
pub fn dedupe(digest: &str) -> String {
    format!("dedupe:{digest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_family() {
        assert_eq!(stats("abc"), "stats:abc");
        assert_eq!(cooldown("abc"), "cooldown:abc");
        assert_eq!(circuit("abc"), "circuit:abc");
        assert_eq!(lock("abc"), "lock:abc");
        assert_eq!(audit("abc"), "audit:abc");
        assert_eq!(events("false_alarm"), "events:false_alarm");
        assert_eq!(dedupe("d34db33f"), "dedupe:d34db33f");
    }
}
