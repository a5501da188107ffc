//! Event envelopes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Version stamped on every envelope built by this crate.
pub const METADATA_VERSION: u32 = 1;

/// Payload key carrying a caller-supplied correlation identifier.
pub const CORRELATION_KEY: &str = "correlationId";

/// An event as journaled and dispatched by the aggregator. Shared by
/// reference (`Arc`) between the journal, correlation chains and listeners;
/// never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event identifier.
    pub id: Uuid,
    /// Owning domain.
    pub domain: String,
    /// Topic within the domain.
    pub topic: String,
    /// Caller-supplied data.
    pub payload: Value,
    /// When the aggregator accepted the event.
    pub timestamp: DateTime<Utc>,
    /// Chain this event belongs to.
    pub correlation_id: String,
    /// Envelope format version.
    pub metadata_version: u32,
}

impl EventEnvelope {
    /// Builds an envelope, reusing `payload.correlationId` when it is a
    /// string and minting a fresh identifier otherwise.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        topic: impl Into<String>,
        payload: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let correlation_id =
            correlation_id_of(&payload).unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id: Uuid::new_v4(),
            domain: domain.into(),
            topic: topic.into(),
            payload,
            timestamp,
            correlation_id,
            metadata_version: METADATA_VERSION,
        }
    }

    /// The `domain:topic` key sagas wait on.
    #[must_use]
    pub fn key(&self) -> String {
        event_key(&self.domain, &self.topic)
    }
}

/// Formats the `domain:topic` key.
#[must_use]
pub fn event_key(domain: &str, topic: &str) -> String {
    format!("{domain}:{topic}")
}

/// Extracts a string `correlationId` from an object payload.
#[must_use]
pub fn correlation_id_of(payload: &Value) -> Option<String> {
    payload
        .get(CORRELATION_KEY)
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use eventmesh_test_support::fixed_instant;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_new_reuses_payload_correlation_id() {
        // Act
        let envelope = EventEnvelope::new(
            "orders",
            "created",
            json!({ "correlationId": "c-1", "total": 10 }),
            fixed_instant(),
        );

        // Assert
        assert_eq!(envelope.correlation_id, "c-1");
        assert_eq!(envelope.key(), "orders:created");
        assert_eq!(envelope.metadata_version, METADATA_VERSION);
        assert_eq!(envelope.timestamp, fixed_instant());
    }

    #[test]
    fn test_new_mints_correlation_id_when_absent_or_not_a_string() {
        // Act
        let plain = EventEnvelope::new("orders", "created", json!({}), fixed_instant());
        let numeric =
            EventEnvelope::new("orders", "created", json!({ "correlationId": 7 }), fixed_instant());

        // Assert
        assert!(Uuid::parse_str(&plain.correlation_id).is_ok());
        assert!(Uuid::parse_str(&numeric.correlation_id).is_ok());
        assert_ne!(plain.correlation_id, numeric.correlation_id);
    }

    #[test]
    fn test_envelope_ids_are_unique() {
        // Act
        let ids: std::collections::HashSet<Uuid> = (0..1000)
            .map(|_| EventEnvelope::new("d", "t", Value::Null, fixed_instant()).id)
            .collect();

        // Assert
        assert_eq!(ids.len(), 1000);
    }
}
