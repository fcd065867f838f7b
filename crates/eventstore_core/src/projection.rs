//! Contract between the event log and read-model projections.
//!
//! A projection maps one event to zero or more statements against its
//! read-model tables. Every statement carries the sequence of the event it
//! came from and the row sequence it expects to find, so a statement whose row
//! has already moved ahead is skipped instead of applied twice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Event, EventStoreError, EventStoreResult, Position, Reducer};

/// Column name to value.
pub type Columns = BTreeMap<String, JsonValue>;

/// Column marking rows whose owner was removed.
pub const OWNER_REMOVED_COLUMN: &str = "owner_removed";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Upsert(Columns),
    Update(Columns),
    Delete,
    /// Tombstone: keeps the row and sets `column` to true.
    OwnerRemoved { column: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionStatement {
    pub table: String,
    pub key: Columns,
    pub aggregate_type: String,
    pub sequence: u64,
    /// Sequence the row must currently have; `None` expects no row.
    pub previous_sequence: Option<u64>,
    pub position: Position,
    pub operation: Operation,
}

impl ProjectionStatement {
    pub fn new(
        event: &Event,
        table: impl Into<String>,
        key: Columns,
        operation: Operation,
    ) -> Self {
        Self {
            table: table.into(),
            key,
            aggregate_type: event.aggregate_type.clone(),
            sequence: event.sequence,
            previous_sequence: None,
            position: event.position,
            operation,
        }
    }

    /// Tombstone update for an "owner removed" event.
    pub fn owner_removed(event: &Event, table: impl Into<String>, key: Columns) -> Self {
        Self::new(
            event,
            table,
            key,
            Operation::OwnerRemoved {
                column: OWNER_REMOVED_COLUMN.to_string(),
            },
        )
    }

    pub fn expect_previous(mut self, sequence: u64) -> Self {
        self.previous_sequence = Some(sequence);
        self
    }

    /// Whether the statement may be applied to a row currently at
    /// `row_sequence` (`None` when the row does not exist).
    pub fn is_applicable(&self, row_sequence: Option<u64>) -> bool {
        match (self.previous_sequence, row_sequence) {
            (None, None) => true,
            (None, Some(_)) | (Some(_), None) => false,
            (Some(expected), Some(current)) => expected == current,
        }
    }
}

/// Maps ordered events to read-model statements. Implementations must be pure.
pub trait Projection {
    fn name(&self) -> &str;

    /// Event types this projection reduces; empty means all.
    fn event_types(&self) -> &[&'static str] {
        &[]
    }

    fn reduce(&self, event: &Event) -> EventStoreResult<Vec<ProjectionStatement>>;
}

/// Runs a projection as the reducer of a query, rejecting events that arrive
/// out of position order.
pub struct ProjectionReducer<'a, P: ?Sized> {
    projection: &'a P,
    last_position: Option<Position>,
    statements: Vec<ProjectionStatement>,
}

impl<'a, P: Projection + ?Sized> ProjectionReducer<'a, P> {
    pub fn new(projection: &'a P) -> Self {
        Self {
            projection,
            last_position: None,
            statements: Vec::new(),
        }
    }

    pub fn last_position(&self) -> Option<Position> {
        self.last_position
    }

    pub fn into_statements(self) -> Vec<ProjectionStatement> {
        self.statements
    }
}

impl<P: Projection + ?Sized> Reducer for ProjectionReducer<'_, P> {
    fn reduce(&mut self, event: Event) -> EventStoreResult<()> {
        if let Some(last) = self.last_position
            && event.position <= last
        {
            return Err(EventStoreError::validation(format!(
                "projection {} received position {} after {last}",
                self.projection.name(),
                event.position
            )));
        }
        self.last_position = Some(event.position);
        let types = self.projection.event_types();
        if !types.is_empty() && !types.contains(&event.event_type.as_str()) {
            return Ok(());
        }
        let statements = self.projection.reduce(&event)?;
        self.statements.extend(statements);
        Ok(())
    }
}
