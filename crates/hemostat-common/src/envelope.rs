//! Broker message envelope and channel names
//!
//! Every message crossing the broker is UTF-8 JSON with the same wrapper:
//! `{timestamp, agent, type, data}`. Agents share only this schema; no agent
//! depends on another agent's internals.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message kinds, one per broker channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    HealthAlert,
    RemediationNeeded,
    RemediationComplete,
    FalseAlarm,
}

impl MessageKind {
    /// Logical channel name; the broker applies the `hemostat:` prefix
    pub fn channel(&self) -> &'static str {
        match self {
            MessageKind::HealthAlert => channels::HEALTH_ALERT,
            MessageKind::RemediationNeeded => channels::REMEDIATION_NEEDED,
            MessageKind::RemediationComplete => channels::REMEDIATION_COMPLETE,
            MessageKind::FalseAlarm => channels::FALSE_ALARM,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.channel()
    }
}

/// Logical pub/sub channel names (kind matches the channel suffix)
pub mod channels {
    pub const HEALTH_ALERT: &str = "health_alert";
    pub const REMEDIATION_NEEDED: &str = "remediation_needed";
    pub const REMEDIATION_COMPLETE: &str = "remediation_complete";
    pub const FALSE_ALARM: &str = "false_alarm";

    pub fn all() -> [&'static str; 4] {
        [
            HEALTH_ALERT,
            REMEDIATION_NEEDED,
            REMEDIATION_COMPLETE,
            FALSE_ALARM,
        ]
    }
}

/// Common wrapper around every broker message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload for publication
    pub fn new<T: Serialize>(agent: &str, kind: MessageKind, data: &T) -> Result<Self> {
        Ok(Self {
            timestamp: Utc::now(),
            agent: agent.to_string(),
            kind,
            data: serde_json::to_value(data)?,
        })
    }

    /// Decode the payload into its typed shape
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::MalformedPayload(format!("{} payload: {}", self.kind.as_str(), e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::MalformedPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisMethod, ContainerRef, FalseAlarm};

    #[test]
    fn kind_matches_channel_suffix() {
        let json = serde_json::to_value(MessageKind::RemediationNeeded).unwrap();
        assert_eq!(json, MessageKind::RemediationNeeded.channel());
    }

    #[test]
    fn encode_decode_is_identity() {
        let payload = FalseAlarm {
            container: ContainerRef::new("abc123", "svc-b", "nginx:1.25"),
            reason: "transient spike".to_string(),
            confidence: 0.4,
            analysis_method: AnalysisMethod::Rule,
        };
        let envelope = Envelope::new("analyzer", MessageKind::FalseAlarm, &payload).unwrap();
        let raw = envelope.to_json().unwrap();

        let parsed = Envelope::from_json(&raw).unwrap();
        assert_eq!(parsed, envelope);
        let roundtripped: FalseAlarm = parsed.decode().unwrap();
        assert_eq!(roundtripped, payload);
    }

    #[test]
    fn wire_envelope_uses_type_field() {
        let payload = serde_json::json!({"k": "v"});
        let envelope = Envelope::new("monitor", MessageKind::HealthAlert, &payload).unwrap();
        let json: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "health_alert");
        assert_eq!(json["agent"], "monitor");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn malformed_envelope_is_reported_not_fatal() {
        let err = Envelope::from_json("{not json").unwrap_err();
        assert_eq!(err.category(), "payload");
    }
}
