// Scrap events (wire in), raw samples, aggregation keys and aggregates (wire out)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BoundaryError;

/// Inbound event as published on `machines/{machineId}/scrap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapEvent {
    pub machine_id: String,
    pub scrap_index: i64,
    pub value: f64,
    /// ISO-8601 / RFC 3339, e.g. "2026-01-05T10:00:00.000Z".
    pub timestamp: String,
}

impl ScrapEvent {
    /// Topic the event belongs to on the message bus.
    pub fn topic(&self) -> String {
        topic_for(&self.machine_id)
    }

    /// Parse a JSON payload. Shape errors and bad timestamps are rejected here, before `ingest`.
    pub fn from_json(payload: &str) -> Result<Self, BoundaryError> {
        let event: ScrapEvent = serde_json::from_str(payload)
            .map_err(|e| BoundaryError::MalformedPayload(e.to_string()))?;
        event.occurred_at_ms()?;
        Ok(event)
    }

    /// Like `from_json`, but the machine id must match the one in `topic`.
    pub fn from_topic_payload(topic: &str, payload: &str) -> Result<Self, BoundaryError> {
        let machine_id = machine_id_from_topic(topic)
            .ok_or_else(|| BoundaryError::TopicMismatch(topic.to_string()))?;
        let event = Self::from_json(payload)?;
        if event.machine_id != machine_id {
            return Err(BoundaryError::TopicMismatch(format!(
                "topic machine {} != payload machine {}",
                machine_id, event.machine_id
            )));
        }
        Ok(event)
    }

    pub fn occurred_at_ms(&self) -> Result<i64, BoundaryError> {
        parse_timestamp_ms(&self.timestamp)
    }
}

pub fn topic_for(machine_id: &str) -> String {
    format!("machines/{}/scrap", machine_id)
}

/// `machines/{id}/scrap` -> `id`. None for any other shape.
pub fn machine_id_from_topic(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("machines/")?;
    let id = rest.strip_suffix("/scrap")?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(id)
}

pub fn parse_timestamp_ms(s: &str) -> Result<i64, BoundaryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc).timestamp_millis())
        .map_err(|e| BoundaryError::InvalidTimestamp(format!("{}: {}", s, e)))
}

/// Millis since epoch -> "2026-01-05T10:00:00.000Z" (same shape JS `toISOString` produces).
pub fn format_timestamp_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// One measurement inside a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub value: f64,
    pub occurred_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub machine_id: String,
    pub metric_index: u32,
}

impl AggregationKey {
    pub fn new(machine_id: impl Into<String>, metric_index: u32) -> Self {
        Self {
            machine_id: machine_id.into(),
            metric_index,
        }
    }
}

/// Outbound aggregate, one per ingested sample. `timestamp` is the triggering event's, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub machine_id: String,
    pub scrap_index: u32,
    #[serde(rename = "sumLast60s")]
    pub sum: f64,
    #[serde(rename = "avgLast60s")]
    pub avg: f64,
    pub timestamp: String,
}

impl AggregatedResult {
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(self.machine_id.clone(), self.scrap_index)
    }
}

/// Row handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapRecord {
    pub machine_id: String,
    pub scrap_index: u32,
    pub value: f64,
    pub timestamp_ms: i64,
}
