use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::{EventStoreError, EventStoreResult, Position};

/// Logical entity whose state is the fold of its event stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    pub instance: String,
    pub aggregate_type: String,
    pub id: String,
    pub owner: String,
    /// Revision stamped on events written for this aggregate.
    pub version: u16,
}

impl Aggregate {
    pub fn new(
        instance: impl Into<String>,
        aggregate_type: impl Into<String>,
        id: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            instance: instance.into(),
            aggregate_type: aggregate_type.into(),
            id: id.into(),
            owner: owner.into(),
            version: 1,
        }
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }
}

/// An event to append; position, sequence and creation time are assigned by
/// the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub aggregate: Aggregate,
    pub event_type: String,
    pub creator: String,
    pub payload: Option<JsonValue>,
}

impl Command {
    pub fn new(
        aggregate: Aggregate,
        event_type: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            aggregate,
            event_type: event_type.into(),
            creator: creator.into(),
            payload: None,
        }
    }

    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> EventStoreResult<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn validate(&self, instance: &str) -> EventStoreResult<()> {
        if self.aggregate.instance != instance {
            return Err(EventStoreError::validation(format!(
                "aggregate instance '{}' does not match append instance '{instance}'",
                self.aggregate.instance
            )));
        }
        if self.aggregate.aggregate_type.is_empty() || self.aggregate.id.is_empty() {
            return Err(EventStoreError::validation("aggregate type and id are required"));
        }
        if self.event_type.is_empty() {
            return Err(EventStoreError::validation("event type is required"));
        }
        Ok(())
    }
}

/// A committed, immutable event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub instance_id: String,
    pub owner: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub revision: u16,
    /// Per-aggregate counter, starting at 1.
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub creator: String,
    pub payload: Option<JsonValue>,
    pub position: Position,
}

impl Event {
    pub fn aggregate(&self) -> Aggregate {
        Aggregate {
            instance: self.instance_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            id: self.aggregate_id.clone(),
            owner: self.owner.clone(),
            version: self.revision,
        }
    }

    /// Decodes the payload; events without payload decode from `null`.
    pub fn unmarshal<T: DeserializeOwned>(&self) -> EventStoreResult<T> {
        let value = self.payload.clone().unwrap_or(JsonValue::Null);
        serde_json::from_value(value).map_err(|err| {
            EventStoreError::validation(format!(
                "payload of {} (sequence {}) does not decode: {err}",
                self.event_type, self.sequence
            ))
        })
    }
}

/// Unix microseconds as stored in the `created_at` column.
pub fn created_at_micros(created_at: OffsetDateTime) -> i64 {
    (created_at.unix_timestamp_nanos() / 1_000) as i64
}

pub fn created_at_from_micros(micros: i64) -> EventStoreResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .map_err(|err| EventStoreError::storage(format!("invalid created_at {micros}: {err}")))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use time::OffsetDateTime;

    use super::{Aggregate, Command, Event, created_at_from_micros, created_at_micros};
    use crate::Position;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct UserAdded {
        username: String,
    }

    #[test]
    fn command_rejects_foreign_instance() {
        let command = Command::new(Aggregate::new("a", "user", "1", "org"), "user.added", "me");
        assert!(command.validate("a").is_ok());
        assert!(command.validate("b").is_err());
    }

    #[test]
    fn command_requires_event_type() {
        let command = Command::new(Aggregate::new("a", "user", "1", "org"), "", "me");
        assert!(command.validate("a").is_err());
    }

    #[test]
    fn event_unmarshals_payload() {
        let payload = UserAdded {
            username: "gigi".into(),
        };
        let command = Command::new(Aggregate::new("a", "user", "1", "org"), "user.added", "me")
            .with_payload(&payload)
            .expect("payload");
        let event = Event {
            instance_id: "a".into(),
            owner: "org".into(),
            aggregate_type: "user".into(),
            aggregate_id: "1".into(),
            event_type: "user.added".into(),
            revision: 1,
            sequence: 1,
            created_at: OffsetDateTime::now_utc(),
            creator: "me".into(),
            payload: command.payload,
            position: Position::at(1.0),
        };
        assert_eq!(event.unmarshal::<UserAdded>().expect("decode"), payload);
        assert_eq!(event.aggregate().id, "1");
    }

    #[test]
    fn created_at_keeps_microseconds() {
        let micros = 1_700_000_000_123_456;
        let created_at = created_at_from_micros(micros).expect("time");
        assert_eq!(created_at_micros(created_at), micros);
    }
}
