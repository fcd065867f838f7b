//! Migration markers: regular events in the destination's own log that record
//! when a copy started and how it ended.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    Aggregate, AggregateFilter, Command, Event, EventFilter, EventStoreResult, MigrationId,
    Position, Query, Reducer,
};

pub const SYSTEM_INSTANCE: &str = "";
pub const SYSTEM_AGGREGATE_TYPE: &str = "system";
pub const SYSTEM_AGGREGATE_ID: &str = "SYSTEM";
pub const MIGRATION_STARTED: &str = "system.migration.started";
pub const MIGRATION_DONE: &str = "system.migration.done";
pub const MIGRATION_CREATOR: &str = "MIGRATION";

pub fn system_aggregate() -> Aggregate {
    Aggregate::new(
        SYSTEM_INSTANCE,
        SYSTEM_AGGREGATE_TYPE,
        SYSTEM_AGGREGATE_ID,
        SYSTEM_INSTANCE,
    )
}

/// Whether `event` is one of the markers written by the migration engine.
pub fn is_marker(instance_id: &str, aggregate_type: &str, event_type: &str) -> bool {
    instance_id == SYSTEM_INSTANCE
        && aggregate_type == SYSTEM_AGGREGATE_TYPE
        && (event_type == MIGRATION_STARTED || event_type == MIGRATION_DONE)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationStarted {
    pub migration_id: MigrationId,
    pub destination: String,
    pub previous_watermark: Position,
    pub target_position: Position,
}

impl MigrationStarted {
    pub fn command(&self) -> EventStoreResult<Command> {
        Command::new(system_aggregate(), MIGRATION_STARTED, MIGRATION_CREATOR).with_payload(self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Success,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MigrationDone {
    pub migration_id: MigrationId,
    pub destination: String,
    pub status: MigrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationDone {
    pub fn success(migration_id: MigrationId, destination: impl Into<String>) -> Self {
        Self {
            migration_id,
            destination: destination.into(),
            status: MigrationStatus::Success,
            error: None,
        }
    }

    pub fn failed(
        migration_id: MigrationId,
        destination: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            migration_id,
            destination: destination.into(),
            status: MigrationStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn command(&self) -> EventStoreResult<Command> {
        Command::new(system_aggregate(), MIGRATION_DONE, MIGRATION_CREATOR).with_payload(self)
    }
}

/// Query over every marker in a store, oldest first.
pub fn marker_query() -> Query {
    Query::new(SYSTEM_INSTANCE).filter(
        AggregateFilter::new()
            .aggregate_type(SYSTEM_AGGREGATE_TYPE)
            .aggregate_id(SYSTEM_AGGREGATE_ID)
            .event(EventFilter::new().event_types([MIGRATION_STARTED, MIGRATION_DONE])),
    )
}

/// Newest successful migration into one destination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastMigration {
    pub migration_id: MigrationId,
    pub previous_watermark: Position,
    pub target_position: Position,
    pub finished_at: Position,
}

/// Folds the markers of [`marker_query`] into the last successful migration
/// for `destination`.
#[derive(Debug)]
pub struct MigrationHistory {
    destination: String,
    started: HashMap<MigrationId, MigrationStarted>,
    last: Option<LastMigration>,
}

impl MigrationHistory {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            started: HashMap::new(),
            last: None,
        }
    }

    pub fn into_last(self) -> Option<LastMigration> {
        self.last
    }

    /// Upper bound already copied; the origin when nothing succeeded yet.
    pub fn watermark(&self) -> Position {
        self.last
            .as_ref()
            .map(|last| last.target_position)
            .unwrap_or(Position::ORIGIN)
    }
}

impl Reducer for MigrationHistory {
    fn reduce(&mut self, event: Event) -> EventStoreResult<()> {
        match event.event_type.as_str() {
            MIGRATION_STARTED => {
                let started: MigrationStarted = event.unmarshal()?;
                if started.destination == self.destination {
                    self.started.insert(started.migration_id, started);
                }
            }
            MIGRATION_DONE => {
                let done: MigrationDone = event.unmarshal()?;
                if done.destination != self.destination || done.status != MigrationStatus::Success
                {
                    return Ok(());
                }
                if let Some(started) = self.started.get(&done.migration_id) {
                    self.last = Some(LastMigration {
                        migration_id: done.migration_id,
                        previous_watermark: started.previous_watermark,
                        target_position: started.target_position,
                        finished_at: event.position,
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}
