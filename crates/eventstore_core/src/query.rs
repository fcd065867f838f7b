//! Filter model compiled by the store's query engine.
//!
//! A [`Query`] is scoped to exactly one instance. Its aggregate filters are
//! OR-combined (each becomes one member of a union); inside one aggregate
//! filter the type/id/owner conditions are AND-combined with the OR of its
//! event filters, and every event filter AND-combines its own conditions.
//! Position bounds, ordering and limit apply to the combined result.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{EventStoreError, EventStoreResult, PositionBound};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TextCondition {
    Equals(String),
    EqualsIgnoreCase(String),
    StartsWith(String),
    In(Vec<String>),
}

impl TextCondition {
    fn validate(&self, column: &str) -> EventStoreResult<()> {
        match self {
            TextCondition::In(values) if values.is_empty() => Err(EventStoreError::query_build(
                format!("empty value list for {column}"),
            )),
            _ => Ok(()),
        }
    }
}

impl From<&str> for TextCondition {
    fn from(value: &str) -> Self {
        TextCondition::Equals(value.to_string())
    }
}

impl From<String> for TextCondition {
    fn from(value: String) -> Self {
        TextCondition::Equals(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberCondition {
    Equals(u64),
    Greater(u64),
    GreaterOrEqual(u64),
    Less(u64),
    LessOrEqual(u64),
    Between(u64, u64),
    In(Vec<u64>),
}

impl NumberCondition {
    fn validate(&self, column: &str) -> EventStoreResult<()> {
        match self {
            NumberCondition::In(values) if values.is_empty() => Err(
                EventStoreError::query_build(format!("empty value list for {column}")),
            ),
            NumberCondition::Between(low, high) if low > high => Err(
                EventStoreError::query_build(format!("inverted range for {column}")),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeCondition {
    After(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Before(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Between(
        #[serde(with = "time::serde::rfc3339")] OffsetDateTime,
        #[serde(with = "time::serde::rfc3339")] OffsetDateTime,
    ),
}

impl TimeCondition {
    fn validate(&self) -> EventStoreResult<()> {
        match self {
            TimeCondition::Between(from, to) if from > to => Err(EventStoreError::query_build(
                "inverted range for created_at",
            )),
            _ => Ok(()),
        }
    }
}

/// Conditions on single events; all defined conditions must hold.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: Option<TextCondition>,
    pub created_at: Option<TimeCondition>,
    pub sequence: Option<NumberCondition>,
    pub revision: Option<NumberCondition>,
    pub creator: Option<TextCondition>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<TextCondition>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_type = Some(TextCondition::In(
            event_types.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn created_at(mut self, condition: TimeCondition) -> Self {
        self.created_at = Some(condition);
        self
    }

    pub fn sequence(mut self, condition: NumberCondition) -> Self {
        self.sequence = Some(condition);
        self
    }

    pub fn revision(mut self, condition: NumberCondition) -> Self {
        self.revision = Some(condition);
        self
    }

    pub fn creator(mut self, creator: impl Into<TextCondition>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.event_type.is_none()
            && self.created_at.is_none()
            && self.sequence.is_none()
            && self.revision.is_none()
            && self.creator.is_none()
    }

    fn validate(&self) -> EventStoreResult<()> {
        if let Some(condition) = &self.event_type {
            condition.validate("event_type")?;
        }
        if let Some(condition) = &self.created_at {
            condition.validate()?;
        }
        if let Some(condition) = &self.sequence {
            condition.validate("sequence")?;
        }
        if let Some(condition) = &self.revision {
            condition.validate("revision")?;
        }
        if let Some(condition) = &self.creator {
            condition.validate("creator")?;
        }
        Ok(())
    }
}

/// Conditions on aggregates, optionally narrowed to matching events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateFilter {
    pub aggregate_type: Option<TextCondition>,
    pub aggregate_id: Option<TextCondition>,
    pub owner: Option<TextCondition>,
    pub events: Vec<EventFilter>,
}

impl AggregateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<TextCondition>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn aggregate_id(mut self, aggregate_id: impl Into<TextCondition>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<TextCondition>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn event(mut self, filter: EventFilter) -> Self {
        self.events.push(filter);
        self
    }

    fn validate(&self) -> EventStoreResult<()> {
        if let Some(condition) = &self.aggregate_type {
            condition.validate("aggregate_type")?;
        }
        if let Some(condition) = &self.aggregate_id {
            condition.validate("aggregate_id")?;
        }
        if let Some(condition) = &self.owner {
            condition.validate("owner")?;
        }
        for event in &self.events {
            event.validate()?;
        }
        Ok(())
    }
}

/// Exclusive bounds on positions: results lie after `min` and before `max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionCondition {
    pub min: Option<PositionBound>,
    pub max: Option<PositionBound>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub position: PositionCondition,
    pub desc: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Pagination {
    fn validate(&self) -> EventStoreResult<()> {
        let PositionCondition { min, max } = self.position;
        for bound in [min, max].into_iter().flatten() {
            if !bound.value.is_finite() {
                return Err(EventStoreError::query_build(format!(
                    "position bound {} is not finite",
                    bound.value
                )));
            }
        }
        if let (Some(min), Some(max)) = (min, max) {
            let empty = match (min.in_tx_order, max.in_tx_order) {
                (Some(low), Some(high)) => (min.value, low) >= (max.value, high),
                _ => min.value >= max.value,
            };
            if empty {
                return Err(EventStoreError::query_build(format!(
                    "position range is empty: min {} is not below max {}",
                    min.value, max.value
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(EventStoreError::query_build("limit must be positive"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub instance: String,
    pub filters: Vec<AggregateFilter>,
    pub pagination: Pagination,
}

impl Query {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            filters: Vec::new(),
            pagination: Pagination::default(),
        }
    }

    pub fn filter(mut self, filter: AggregateFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Only events after `bound`.
    pub fn position_after(mut self, bound: impl Into<PositionBound>) -> Self {
        self.pagination.position.min = Some(bound.into());
        self
    }

    /// Only events before `bound`.
    pub fn position_before(mut self, bound: impl Into<PositionBound>) -> Self {
        self.pagination.position.max = Some(bound.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.pagination.desc = true;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.pagination.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.pagination.offset = Some(offset);
        self
    }

    pub fn validate(&self) -> EventStoreResult<()> {
        if self.filters.is_empty() {
            return Err(EventStoreError::query_build(
                "query does not contain filters",
            ));
        }
        for filter in &self.filters {
            filter.validate()?;
        }
        self.pagination.validate()
    }
}
