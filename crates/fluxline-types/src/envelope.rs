//! Error envelope and dead-letter record types.
//!
//! [`ErrorMessage`] captures a processing failure with enough context to
//! diagnose or replay it. [`DeadLetter`] is the terminal record kept by the
//! dispatcher once a message has exhausted every recovery path.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for a message that failed endpoint processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Id of the message that failed.
    pub original_id: Uuid,
    /// JSON rendering of the failed message's payload.
    pub payload: serde_json::Value,
    /// Endpoint whose processing failed.
    pub failed_endpoint: String,
    /// Human-readable failure cause.
    pub cause: String,
    /// Processing attempts made before surfacing the failure.
    pub attempts: u32,
}

/// Where a dead-lettered message was when recovery gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterOrigin {
    /// Failed at an endpoint and the error flow could not absorb it.
    Endpoint(String),
    /// Still queued on a channel when the drain grace period lapsed.
    ChannelDrain(String),
}

/// Record of a message that exhausted retry and error-flow handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Endpoint or channel the message died at.
    pub origin: DeadLetterOrigin,
    /// Id of the dead message.
    pub message_id: Uuid,
    /// JSON rendering of the dead message's payload.
    pub payload: serde_json::Value,
    /// Failure cause, or the shutdown reason for drained messages.
    pub cause: String,
    /// Processing attempts made, zero for drain casualties.
    pub attempts: u32,
    /// When the message was declared dead.
    pub failed_at: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_serde_roundtrip() {
        let record = DeadLetter {
            origin: DeadLetterOrigin::Endpoint("enrich".into()),
            message_id: Uuid::new_v4(),
            payload: serde_json::json!({"order": 7}),
            cause: "collaborator unreachable".into(),
            attempts: 3,
            failed_at: SystemTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: DeadLetter = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn origin_serializes_snake_case() {
        let json =
            serde_json::to_value(DeadLetterOrigin::ChannelDrain("inbound".into())).unwrap();
        assert_eq!(json, serde_json::json!({"channel_drain": "inbound"}));
    }
}
