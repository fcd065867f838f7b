//! Compiles the filter model into one parameterised select.
//!
//! A single aggregate filter becomes a plain select over `events2`. Several
//! filters become a `UNION ALL` of one select each, wrapped in a subquery so
//! that position bounds, ordering, limit and offset apply to the combined
//! result.

use async_trait::async_trait;
use futures::TryStreamExt;
use sea_orm::sea_query::{
    Alias, Condition, Expr, ExprTrait, Func, LikeExpr, Order, Query as SqlQuery, SelectStatement,
    UnionType,
};
use sea_orm::{ConnectionTrait, Statement, StreamTrait};

use crate::db::*;
use crate::store::{EVENT_COLUMNS, EventStore, build_stmt, read_event};
use eventstore_core::{
    AggregateFilter, EventFilter, EventQuerier, EventStoreError, EventStoreResult, NumberCondition,
    Pagination, PositionBound, Query, Reducer, TextCondition, TimeCondition, created_at_micros,
};

const FILTERED_EVENTS: &str = "filtered_events";

#[async_trait]
impl EventQuerier for EventStore {
    async fn query<R>(&self, query: &Query, reducer: &mut R) -> EventStoreResult<usize>
    where
        R: Reducer + Send + ?Sized,
    {
        query_with(self.connection(), query, reducer).await
    }
}

/// Runs `query` on `conn`, which may be a pool or an open transaction.
///
/// Rows are streamed and handed to `reducer` one at a time; an error from the
/// reducer stops the stream.
pub async fn query_with<C, R>(conn: &C, query: &Query, reducer: &mut R) -> EventStoreResult<usize>
where
    C: ConnectionTrait + StreamTrait,
    R: Reducer + Send + ?Sized,
{
    let select = compile(query)?;
    let backend = ConnectionTrait::get_database_backend(conn);
    let (sql, values) = build_stmt(backend, &select);
    let stream = conn
        .stream_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    let mut rows = std::pin::pin!(stream);
    let mut count = 0;
    while let Some(row) = rows.try_next().await? {
        reducer.reduce(read_event(&row)?)?;
        count += 1;
    }
    Ok(count)
}

pub fn compile(query: &Query) -> EventStoreResult<SelectStatement> {
    query.validate()?;
    let mut selects = query
        .filters
        .iter()
        .map(|filter| filter_select(&query.instance, filter))
        .collect::<EventStoreResult<Vec<_>>>()?;

    let mut select = if selects.len() == 1 {
        selects.remove(0)
    } else {
        let mut members = selects.into_iter();
        let Some(mut union) = members.next() else {
            return Err(EventStoreError::query_build("query does not contain filters"));
        };
        for member in members {
            union.union(UnionType::All, member);
        }
        SqlQuery::select()
            .columns(EVENT_COLUMNS)
            .from_subquery(union, Alias::new(FILTERED_EVENTS))
            .to_owned()
    };
    apply_pagination(&mut select, &query.pagination);
    Ok(select)
}

fn filter_select(instance: &str, filter: &AggregateFilter) -> EventStoreResult<SelectStatement> {
    let mut condition = Condition::all().add(Expr::col(Events2::InstanceId).eq(instance));
    if let Some(text) = &filter.aggregate_type {
        condition = condition.add(text_condition(Events2::AggregateType, text));
    }
    if let Some(text) = &filter.aggregate_id {
        condition = condition.add(text_condition(Events2::AggregateId, text));
    }
    if let Some(text) = &filter.owner {
        condition = condition.add(text_condition(Events2::Owner, text));
    }
    if !filter.events.is_empty() && !filter.events.iter().any(EventFilter::is_empty) {
        let mut any = Condition::any();
        for event in &filter.events {
            any = any.add(event_condition(event)?);
        }
        condition = condition.add(any);
    }
    Ok(SqlQuery::select()
        .columns(EVENT_COLUMNS)
        .from(Events2::Table)
        .cond_where(condition)
        .to_owned())
}

fn event_condition(filter: &EventFilter) -> EventStoreResult<Condition> {
    let mut condition = Condition::all();
    if let Some(text) = &filter.event_type {
        condition = condition.add(text_condition(Events2::EventType, text));
    }
    if let Some(time) = &filter.created_at {
        condition = condition.add(time_condition(time));
    }
    if let Some(number) = &filter.sequence {
        condition = condition.add(number_condition(Events2::Sequence, number)?);
    }
    if let Some(number) = &filter.revision {
        condition = condition.add(number_condition(Events2::Revision, number)?);
    }
    if let Some(text) = &filter.creator {
        condition = condition.add(text_condition(Events2::Creator, text));
    }
    Ok(condition)
}

fn text_condition(column: Events2, text: &TextCondition) -> Condition {
    let expr = match text {
        TextCondition::Equals(value) => Expr::col(column).eq(value.clone()),
        TextCondition::EqualsIgnoreCase(value) => {
            Expr::expr(Func::lower(Expr::col(column))).eq(value.to_lowercase())
        }
        TextCondition::StartsWith(value) => Expr::col(column)
            .like(LikeExpr::new(format!("{}%", escape_like(value))).escape('\\')),
        TextCondition::In(values) => Expr::col(column).is_in(values.iter().cloned()),
    };
    Condition::all().add(expr)
}

fn number_condition(column: Events2, number: &NumberCondition) -> EventStoreResult<Condition> {
    let expr = match number {
        NumberCondition::Equals(value) => Expr::col(column).eq(to_i64(*value)?),
        NumberCondition::Greater(value) => Expr::col(column).gt(to_i64(*value)?),
        NumberCondition::GreaterOrEqual(value) => Expr::col(column).gte(to_i64(*value)?),
        NumberCondition::Less(value) => Expr::col(column).lt(to_i64(*value)?),
        NumberCondition::LessOrEqual(value) => Expr::col(column).lte(to_i64(*value)?),
        NumberCondition::Between(low, high) => {
            Expr::col(column).between(to_i64(*low)?, to_i64(*high)?)
        }
        NumberCondition::In(values) => Expr::col(column).is_in(
            values
                .iter()
                .map(|value| to_i64(*value))
                .collect::<EventStoreResult<Vec<_>>>()?,
        ),
    };
    Ok(Condition::all().add(expr))
}

fn time_condition(time: &TimeCondition) -> Condition {
    let expr = match time {
        TimeCondition::After(at) => Expr::col(Events2::CreatedAt).gt(created_at_micros(*at)),
        TimeCondition::Before(at) => Expr::col(Events2::CreatedAt).lt(created_at_micros(*at)),
        TimeCondition::Between(from, to) => Expr::col(Events2::CreatedAt)
            .between(created_at_micros(*from), created_at_micros(*to)),
    };
    Condition::all().add(expr)
}

fn apply_pagination(select: &mut SelectStatement, pagination: &Pagination) {
    if let Some(min) = pagination.position.min {
        select.cond_where(after_bound(min));
    }
    if let Some(max) = pagination.position.max {
        select.cond_where(before_bound(max));
    }
    let order = if pagination.desc {
        Order::Desc
    } else {
        Order::Asc
    };
    select
        .order_by(Events2::Position, order.clone())
        .order_by(Events2::InTxOrder, order);
    if let Some(limit) = pagination.limit {
        select.limit(limit);
    }
    if let Some(offset) = pagination.offset {
        if pagination.limit.is_none() && offset > 0 {
            // SQLite and MySQL require a limit before an offset.
            select.limit(i64::MAX as u64);
        }
        select.offset(offset);
    }
}

/// Rows strictly after `bound`.
fn after_bound(bound: PositionBound) -> Condition {
    match bound.in_tx_order {
        None => Condition::all().add(Expr::col(Events2::Position).gt(bound.value)),
        Some(order) => Condition::any()
            .add(Expr::col(Events2::Position).gt(bound.value))
            .add(
                Condition::all()
                    .add(Expr::col(Events2::Position).eq(bound.value))
                    .add(Expr::col(Events2::InTxOrder).gt(i64::from(order))),
            ),
    }
}

/// Rows strictly before `bound`.
fn before_bound(bound: PositionBound) -> Condition {
    match bound.in_tx_order {
        None => Condition::all().add(Expr::col(Events2::Position).lt(bound.value)),
        Some(order) => Condition::any()
            .add(Expr::col(Events2::Position).lt(bound.value))
            .add(
                Condition::all()
                    .add(Expr::col(Events2::Position).eq(bound.value))
                    .add(Expr::col(Events2::InTxOrder).lt(i64::from(order))),
            ),
    }
}

fn to_i64(value: u64) -> EventStoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::query_build(format!("value {value} out of range")))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
