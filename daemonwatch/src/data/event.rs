//! Console events
//!
//! The daemon wraps every console line in an event envelope whose `id` is a
//! stringified 64-bit snowflake. Only envelopes in the instance-event
//! category carrying instance output become `StreamEvent`s; anything else is
//! discarded without being treated as an error.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

pub const CONSOLE_EVENT_CATEGORY: &str = "InstanceEvent";
pub const CONSOLE_OUTPUT_KIND: &str = "InstanceOutput";

/// Number of low bits below the millisecond timestamp in a snowflake.
const SNOWFLAKE_TIMESTAMP_SHIFT: u32 = 22;

/// A live message that could not be decoded into the expected shape.
#[derive(Error, Debug)]
#[error("malformed message: {0}")]
pub struct MalformedMessage(#[from] serde_json::Error);

/// Monotonically increasing identifier; the upper bits hold the creation
/// time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnowflakeId(pub u64);

impl SnowflakeId {
    pub fn timestamp_millis(&self) -> i64 {
        (self.0 >> SNOWFLAKE_TIMESTAMP_SHIFT) as i64
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_millis())
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }
}

impl From<u64> for SnowflakeId {
    fn from(value: u64) -> Self {
        SnowflakeId(value)
    }
}

impl FromStr for SnowflakeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(SnowflakeId)
    }
}

impl fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SnowflakeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SnowflakeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The wire form is a string, but plain numbers are tolerated.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Text(String),
            Number(u64),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Wire::Number(n) => Ok(SnowflakeId(n)),
        }
    }
}

/// One console line, as retained by the merger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub id: SnowflakeId,
    pub instance_id: Uuid,
    pub instance_name: String,
    pub message: String,
}

impl StreamEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.id.timestamp()
    }
}

/// The subset of the daemon's event envelope that is consumed here.
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    pub id: SnowflakeId,
    #[serde(default)]
    pub detail: String,
    pub category: String,
    #[serde(default)]
    pub inner: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOutput {
    pub target_id: Uuid,
    pub target_name: String,
    pub kind: String,
    pub message: String,
}

impl EventEnvelope {
    pub fn parse(text: &str) -> Result<EventEnvelope, MalformedMessage> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parses a JSON array of envelopes. Elements that do not decode are
    /// skipped; only a body that is not an array at all is an error.
    pub fn parse_batch(text: &str) -> Result<Vec<EventEnvelope>, MalformedMessage> {
        let items: Vec<serde_json::Value> = serde_json::from_str(text)?;
        let total = items.len();
        let batch: Vec<EventEnvelope> = items
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if batch.len() < total {
            warn!("skipped {} undecodable backfill entries", total - batch.len());
        }
        Ok(batch)
    }

    /// Converts a console-output envelope into a `StreamEvent`. Returns `None`
    /// for every other category or kind.
    pub fn into_stream_event(self) -> Option<StreamEvent> {
        if self.category != CONSOLE_EVENT_CATEGORY {
            return None;
        }
        let output = InstanceOutput::deserialize(&self.inner).ok()?;
        if output.kind != CONSOLE_OUTPUT_KIND {
            return None;
        }
        Some(StreamEvent {
            id: self.id,
            instance_id: output.target_id,
            instance_name: output.target_name,
            message: output.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "3f2b1c9e-8d4a-4b6f-9e1a-2c3d4e5f6a7b";

    fn envelope(id: &str, category: &str, kind: &str, message: &str) -> String {
        format!(
            r#"{{"id":"{id}","detail":"","category":"{category}","inner":{{"targetId":"{TARGET}","targetName":"survival","kind":"{kind}","message":"{message}"}}}}"#
        )
    }

    #[test]
    fn console_output_becomes_stream_event() {
        let env = EventEnvelope::parse(&envelope("102", "InstanceEvent", "InstanceOutput", "hi"))
            .unwrap();
        let event = env.into_stream_event().unwrap();
        assert_eq!(event.id, SnowflakeId(102));
        assert_eq!(event.instance_name, "survival");
        assert_eq!(event.message, "hi");
        assert_eq!(event.instance_id, Uuid::parse_str(TARGET).unwrap());
    }

    #[test]
    fn other_categories_and_kinds_are_discarded() {
        let user = EventEnvelope::parse(&envelope("5", "UserEvent", "InstanceOutput", "x")).unwrap();
        assert!(user.into_stream_event().is_none());

        let state =
            EventEnvelope::parse(&envelope("6", "InstanceEvent", "StateTransition", "x")).unwrap();
        assert!(state.into_stream_event().is_none());

        let bare: EventEnvelope =
            serde_json::from_str(r#"{"id":"7","category":"InstanceEvent"}"#).unwrap();
        assert!(bare.into_stream_event().is_none());
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(EventEnvelope::parse("not json").is_err());
        assert!(EventEnvelope::parse(r#"{"id":"abc","category":"InstanceEvent"}"#).is_err());
        assert!(EventEnvelope::parse(r#"{"category":"InstanceEvent"}"#).is_err());
    }

    #[test]
    fn batch_skips_bad_entries() {
        let text = format!(
            "[{},{},{}]",
            envelope("1", "InstanceEvent", "InstanceOutput", "a"),
            r#"{"id":"nope","category":"InstanceEvent"}"#,
            envelope("3", "InstanceEvent", "InstanceOutput", "c"),
        );
        let batch = EventEnvelope::parse_batch(&text).unwrap();
        let ids: Vec<u64> = batch.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(EventEnvelope::parse_batch("{}").is_err());
        assert!(EventEnvelope::parse_batch("[]").unwrap().is_empty());
    }

    #[test]
    fn numeric_ids_are_tolerated() {
        let env: EventEnvelope =
            serde_json::from_str(r#"{"id":42,"category":"InstanceEvent"}"#).unwrap();
        assert_eq!(env.id, SnowflakeId(42));
    }

    #[test]
    fn snowflake_encodes_creation_time() {
        let millis: u64 = 1_700_000_000_123;
        let id = SnowflakeId((millis << 22) | 0x3ff);
        assert_eq!(id.timestamp_millis(), millis as i64);
        assert_eq!(id.timestamp().timestamp_millis(), millis as i64);
        assert_eq!(id.to_string().parse::<SnowflakeId>().unwrap(), id);
    }
}
