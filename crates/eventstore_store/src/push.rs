use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::sea_query::{Condition, Expr, ExprTrait, Func, InsertStatement, Query};
use sea_orm::{ConnectionTrait, DbErr, SqlErr, TransactionTrait};
use time::OffsetDateTime;

use crate::db::*;
use crate::store::{
    EVENT_COLUMNS, EventStore, clock_reading, col_name, event_values, exec, newest_position,
    query_one, try_exec,
};
use eventstore_core::{
    Command, ConstraintAction, Event, EventPusher, EventRecord, EventStoreError, EventStoreResult,
    Position, UniqueConstraint, created_at_from_micros, created_at_micros,
};

#[async_trait]
impl EventPusher for EventStore {
    async fn append(
        &self,
        instance: &str,
        commands: Vec<Command>,
        constraints: Vec<UniqueConstraint>,
    ) -> EventStoreResult<Vec<Event>> {
        if commands.is_empty() && constraints.is_empty() {
            return Ok(Vec::new());
        }
        for command in &commands {
            command.validate(instance)?;
        }
        let tx = self.connection().begin().await?;
        for constraint in &constraints {
            apply_constraint(&tx, instance, constraint).await?;
        }
        let events = insert_events(&tx, self, instance, commands).await?;
        tx.commit().await?;
        log::debug!(
            "appended {} events and {} constraints to instance '{instance}'",
            events.len(),
            constraints.len()
        );
        Ok(events)
    }
}

async fn insert_events<C: ConnectionTrait>(
    conn: &C,
    store: &EventStore,
    instance: &str,
    commands: Vec<Command>,
) -> EventStoreResult<Vec<Event>> {
    if commands.is_empty() {
        return Ok(Vec::new());
    }
    let first = next_free_position(conn, store, instance).await?;
    let created_at = created_at_from_micros(created_at_micros(OffsetDateTime::now_utc()))?;
    let mut sequences: HashMap<(String, String), u64> = HashMap::new();
    let mut events = Vec::with_capacity(commands.len());
    for (offset, command) in commands.into_iter().enumerate() {
        let key = (
            command.aggregate.aggregate_type.clone(),
            command.aggregate.id.clone(),
        );
        let sequence = match sequences.get(&key) {
            Some(sequence) => sequence + 1,
            None => current_sequence(conn, instance, &key.0, &key.1).await? + 1,
        };
        sequences.insert(key, sequence);
        let offset = u32::try_from(offset)
            .map_err(|_| EventStoreError::validation("too many commands in one append"))?;
        events.push(Event {
            instance_id: instance.to_string(),
            owner: command.aggregate.owner,
            aggregate_type: command.aggregate.aggregate_type,
            aggregate_id: command.aggregate.id,
            event_type: command.event_type,
            revision: command.aggregate.version,
            sequence,
            created_at,
            creator: command.creator,
            payload: command.payload,
            position: Position::new(first.value, first.in_tx_order + offset),
        });
    }

    let insert = events_insert(&events)?;
    try_exec(conn, &insert)
        .await
        .map_err(|err| write_conflict(instance, err))?;
    Ok(events)
}

fn events_insert(events: &[Event]) -> EventStoreResult<InsertStatement> {
    let mut insert = Query::insert()
        .into_table(Events2::Table)
        .columns(EVENT_COLUMNS)
        .to_owned();
    for event in events {
        let values = event_values(&EventRecord::from_event(event)?)?;
        insert
            .values(values.into_iter().map(Into::into))
            .map_err(|err| EventStoreError::query_build(err.to_string()))?;
    }
    Ok(insert)
}

/// Concurrent appends reading the same newest position or aggregate sequence
/// collide on the `events2` keys; the loser gets a retryable conflict.
fn write_conflict(instance: &str, err: DbErr) -> EventStoreError {
    let message = err.to_string();
    unique_violation(err, || EventStoreError::write_conflict(instance, message))
}

/// First free position of `instance`: the clock reading, or the newest stored
/// position when the clock lags behind it.
async fn next_free_position<C: ConnectionTrait>(
    conn: &C,
    store: &EventStore,
    instance: &str,
) -> EventStoreResult<Position> {
    let reading = clock_reading(conn, store.clock()).await?;
    let Some(newest) = newest_position(conn, instance).await? else {
        return Ok(reading);
    };
    if reading.value > newest.value {
        Ok(reading)
    } else {
        Ok(Position::new(newest.value, newest.in_tx_order + 1))
    }
}

async fn current_sequence<C: ConnectionTrait>(
    conn: &C,
    instance: &str,
    aggregate_type: &str,
    aggregate_id: &str,
) -> EventStoreResult<u64> {
    let select = Query::select()
        .expr_as(
            Func::max(Expr::col(Events2::Sequence)),
            Events2::Sequence,
        )
        .from(Events2::Table)
        .and_where(Expr::col(Events2::InstanceId).eq(instance))
        .and_where(Expr::col(Events2::AggregateType).eq(aggregate_type))
        .and_where(Expr::col(Events2::AggregateId).eq(aggregate_id))
        .to_owned();
    let sequence: Option<i64> = match query_one(conn, &select).await? {
        Some(row) => row.try_get("", &col_name(Events2::Sequence))?,
        None => None,
    };
    Ok(Ord::max(sequence.unwrap_or(0), 0) as u64)
}

async fn apply_constraint<C: ConnectionTrait>(
    conn: &C,
    instance: &str,
    constraint: &UniqueConstraint,
) -> EventStoreResult<()> {
    let stored_instance = constraint.stored_instance(instance);
    match constraint.action {
        ConstraintAction::Add => {
            let select = Query::select()
                .column(UniqueConstraints::UniqueField)
                .from(UniqueConstraints::Table)
                .cond_where(constraint_key(stored_instance, constraint))
                .limit(1)
                .to_owned();
            if query_one(conn, &select).await?.is_some() {
                return Err(violation(stored_instance, constraint));
            }
            let insert = Query::insert()
                .into_table(UniqueConstraints::Table)
                .columns([
                    UniqueConstraints::InstanceId,
                    UniqueConstraints::UniqueType,
                    UniqueConstraints::UniqueField,
                ])
                .values_panic([
                    stored_instance.into(),
                    constraint.unique_type.clone().into(),
                    constraint.stored_field().into(),
                ])
                .to_owned();
            try_exec(conn, &insert)
                .await
                .map_err(|err| unique_violation(err, || violation(stored_instance, constraint)))?;
            Ok(())
        }
        ConstraintAction::Remove => {
            let delete = Query::delete()
                .from_table(UniqueConstraints::Table)
                .cond_where(constraint_key(stored_instance, constraint))
                .to_owned();
            exec(conn, &delete).await?;
            Ok(())
        }
        ConstraintAction::RemoveInstance => {
            let delete = Query::delete()
                .from_table(UniqueConstraints::Table)
                .and_where(Expr::col(UniqueConstraints::InstanceId).eq(instance))
                .to_owned();
            exec(conn, &delete).await?;
            Ok(())
        }
    }
}

fn constraint_key(stored_instance: &str, constraint: &UniqueConstraint) -> Condition {
    let field = if constraint.ignore_case {
        Expr::expr(Func::lower(Expr::col(UniqueConstraints::UniqueField)))
            .eq(constraint.stored_field())
    } else {
        Expr::col(UniqueConstraints::UniqueField).eq(constraint.stored_field())
    };
    Condition::all()
        .add(Expr::col(UniqueConstraints::InstanceId).eq(stored_instance))
        .add(Expr::col(UniqueConstraints::UniqueType).eq(constraint.unique_type.clone()))
        .add(field)
}

fn violation(stored_instance: &str, constraint: &UniqueConstraint) -> EventStoreError {
    EventStoreError::constraint_violation(
        stored_instance,
        constraint.unique_type.clone(),
        constraint.violation_message(),
    )
}

/// Maps a unique-key failure reported by the database to `violation`.
pub(crate) fn unique_violation(
    err: DbErr,
    violation: impl FnOnce() -> EventStoreError,
) -> EventStoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => violation(),
        _ => EventStoreError::from(err),
    }
}
