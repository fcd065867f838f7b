//! Streaming export and import of `events2` and `unique_constraints`.

use async_trait::async_trait;
use sea_orm::sea_query::{Condition, Expr, ExprTrait, Order, Query, SelectStatement};
use sea_orm::{ConnectionTrait, TransactionTrait};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::db::*;
use crate::push::unique_violation;
use crate::store::{
    EVENT_COLUMNS, EventStore, event_values, exec, query_all, read_constraint, read_record,
    try_exec,
};
use eventstore_core::{
    BulkTransfer, ConstraintImport, ConstraintImportOutcome, ConstraintRecord, CopySide,
    EventRecord, EventStoreError, EventStoreResult, ExportWindow, FrameReader, FrameWriter,
    ImportOptions, MIGRATION_DONE, MIGRATION_STARTED, SYSTEM_AGGREGATE_TYPE, SYSTEM_INSTANCE,
    strip_nul,
};

const CONSTRAINT_COLUMNS: [UniqueConstraints; 3] = [
    UniqueConstraints::InstanceId,
    UniqueConstraints::UniqueType,
    UniqueConstraints::UniqueField,
];

#[async_trait]
impl BulkTransfer for EventStore {
    async fn export_events<W>(&self, window: &ExportWindow, writer: W) -> EventStoreResult<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        export_events(self, window, writer)
            .await
            .map_err(|err| err.on_side(CopySide::Source))
    }

    async fn import_events<R>(&self, reader: R, options: &ImportOptions) -> EventStoreResult<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        import_events(self, reader, options)
            .await
            .map_err(|err| err.on_side(CopySide::Destination))
    }

    async fn export_constraints<W>(
        &self,
        instances: &[String],
        batch_size: u64,
        writer: W,
    ) -> EventStoreResult<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        export_constraints(self, instances, batch_size, writer)
            .await
            .map_err(|err| err.on_side(CopySide::Source))
    }

    async fn import_constraints<R>(
        &self,
        reader: R,
        options: &ConstraintImport,
    ) -> EventStoreResult<ConstraintImportOutcome>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        import_constraints(self, reader, options)
            .await
            .map_err(|err| err.on_side(CopySide::Destination))
    }
}

async fn export_events<W>(
    store: &EventStore,
    window: &ExportWindow,
    writer: W,
) -> EventStoreResult<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut frames = FrameWriter::new(writer);
    let mut cursor: Option<(String, f64, u32)> = None;
    let mut ordinal: Option<(String, u32)> = None;
    loop {
        let mut select = event_window(window);
        if let Some((instance, position, in_tx_order)) = &cursor {
            select.cond_where(after_event(instance, *position, *in_tx_order));
        }
        select.limit(Ord::max(window.batch_size, 1));
        let rows = query_all(store.connection(), &select).await?;
        if rows.is_empty() {
            break;
        }
        for row in &rows {
            let mut record = read_record(row)?;
            cursor = Some((
                record.instance_id.clone(),
                record.position,
                record.in_tx_order,
            ));
            record.payload = record.payload.as_deref().map(strip_nul);
            if let Some(value) = window.rebase_to {
                let next = match &ordinal {
                    Some((instance, last)) if *instance == record.instance_id => last + 1,
                    _ => 0,
                };
                ordinal = Some((record.instance_id.clone(), next));
                record.position = value;
                record.in_tx_order = next;
            }
            frames.write_row(&record).await?;
        }
        if (rows.len() as u64) < Ord::max(window.batch_size, 1) {
            break;
        }
    }
    let rows = frames.finish().await?;
    log::debug!(
        "exported {rows} events after {} until {}",
        window.after,
        window.until
    );
    Ok(rows)
}

fn event_window(window: &ExportWindow) -> SelectStatement {
    let marker = Condition::all()
        .add(Expr::col(Events2::InstanceId).eq(SYSTEM_INSTANCE))
        .add(Expr::col(Events2::AggregateType).eq(SYSTEM_AGGREGATE_TYPE))
        .add(Expr::col(Events2::EventType).is_in([MIGRATION_STARTED, MIGRATION_DONE]))
        .not();
    let mut select = Query::select()
        .columns(EVENT_COLUMNS)
        .from(Events2::Table)
        .and_where(Expr::col(Events2::Position).gt(window.after.value))
        .and_where(Expr::col(Events2::Position).lte(window.until.value))
        .cond_where(marker)
        .order_by(Events2::InstanceId, Order::Asc)
        .order_by(Events2::Position, Order::Asc)
        .order_by(Events2::InTxOrder, Order::Asc)
        .to_owned();
    if !window.instances.is_empty() {
        select.and_where(Expr::col(Events2::InstanceId).is_in(window.instances.iter().cloned()));
    }
    select
}

/// Keyset condition: rows ordered after `(instance, position, in_tx_order)`.
fn after_event(instance: &str, position: f64, in_tx_order: u32) -> Condition {
    Condition::any()
        .add(Expr::col(Events2::InstanceId).gt(instance))
        .add(
            Condition::all()
                .add(Expr::col(Events2::InstanceId).eq(instance))
                .add(Expr::col(Events2::Position).gt(position)),
        )
        .add(
            Condition::all()
                .add(Expr::col(Events2::InstanceId).eq(instance))
                .add(Expr::col(Events2::Position).eq(position))
                .add(Expr::col(Events2::InTxOrder).gt(i64::from(in_tx_order))),
        )
}

async fn import_events<R>(
    store: &EventStore,
    reader: R,
    options: &ImportOptions,
) -> EventStoreResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut frames = FrameReader::new(BufReader::new(reader));
    let batch_size = usize::try_from(Ord::max(options.batch_size, 1)).unwrap_or(usize::MAX);
    let tx = store.connection().begin().await?;
    let mut imported = 0u64;
    loop {
        let batch: Vec<EventRecord> = frames.next_batch(batch_size).await?;
        if batch.is_empty() {
            break;
        }
        insert_event_batch(&tx, &batch).await?;
        imported += batch.len() as u64;
    }
    tx.commit().await?;
    log::debug!("imported {imported} events");
    Ok(imported)
}

async fn insert_event_batch<C: ConnectionTrait>(
    conn: &C,
    batch: &[EventRecord],
) -> EventStoreResult<()> {
    let mut insert = Query::insert()
        .into_table(Events2::Table)
        .columns(EVENT_COLUMNS)
        .to_owned();
    for record in batch {
        insert
            .values(event_values(record)?.into_iter().map(Into::into))
            .map_err(|err| EventStoreError::query_build(err.to_string()))?;
    }
    exec(conn, &insert).await?;
    Ok(())
}

async fn export_constraints<W>(
    store: &EventStore,
    instances: &[String],
    batch_size: u64,
    writer: W,
) -> EventStoreResult<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut frames = FrameWriter::new(writer);
    let mut cursor: Option<ConstraintRecord> = None;
    let page = Ord::max(batch_size, 1);
    loop {
        let mut select = Query::select()
            .columns(CONSTRAINT_COLUMNS)
            .from(UniqueConstraints::Table)
            .order_by(UniqueConstraints::InstanceId, Order::Asc)
            .order_by(UniqueConstraints::UniqueType, Order::Asc)
            .order_by(UniqueConstraints::UniqueField, Order::Asc)
            .limit(page)
            .to_owned();
        if !instances.is_empty() {
            select.and_where(
                Expr::col(UniqueConstraints::InstanceId).is_in(instances.iter().cloned()),
            );
        }
        if let Some(last) = &cursor {
            select.cond_where(after_constraint(last));
        }
        let rows = query_all(store.connection(), &select).await?;
        if rows.is_empty() {
            break;
        }
        for row in &rows {
            let record = read_constraint(row)?;
            frames.write_row(&record).await?;
            cursor = Some(record);
        }
        if (rows.len() as u64) < page {
            break;
        }
    }
    frames.finish().await
}

fn after_constraint(last: &ConstraintRecord) -> Condition {
    Condition::any()
        .add(Expr::col(UniqueConstraints::InstanceId).gt(last.instance_id.clone()))
        .add(
            Condition::all()
                .add(Expr::col(UniqueConstraints::InstanceId).eq(last.instance_id.clone()))
                .add(Expr::col(UniqueConstraints::UniqueType).gt(last.unique_type.clone())),
        )
        .add(
            Condition::all()
                .add(Expr::col(UniqueConstraints::InstanceId).eq(last.instance_id.clone()))
                .add(Expr::col(UniqueConstraints::UniqueType).eq(last.unique_type.clone()))
                .add(Expr::col(UniqueConstraints::UniqueField).gt(last.unique_field.clone())),
        )
}

async fn import_constraints<R>(
    store: &EventStore,
    reader: R,
    options: &ConstraintImport,
) -> EventStoreResult<ConstraintImportOutcome>
where
    R: AsyncRead + Unpin + Send,
{
    let mut frames = FrameReader::new(BufReader::new(reader));
    let batch_size = usize::try_from(Ord::max(options.batch_size, 1)).unwrap_or(usize::MAX);
    let tx = store.connection().begin().await?;
    let mut outcome = ConstraintImportOutcome::default();
    if options.replace {
        let mut delete = Query::delete().from_table(UniqueConstraints::Table).to_owned();
        if !options.instances.is_empty() {
            delete.and_where(
                Expr::col(UniqueConstraints::InstanceId).is_in(options.instances.iter().cloned()),
            );
        }
        outcome.removed = exec(&tx, &delete).await?;
    }
    loop {
        let batch: Vec<ConstraintRecord> = frames.next_batch(batch_size).await?;
        if batch.is_empty() {
            break;
        }
        if let Some(existing) = first_existing(&tx, &batch).await? {
            return Err(EventStoreError::constraint_violation(
                existing.instance_id,
                existing.unique_type,
                format!("constraint '{}' already exists", existing.unique_field),
            ));
        }
        let mut insert = Query::insert()
            .into_table(UniqueConstraints::Table)
            .columns(CONSTRAINT_COLUMNS)
            .to_owned();
        for record in &batch {
            insert.values_panic([
                record.instance_id.clone().into(),
                record.unique_type.clone().into(),
                record.unique_field.clone().into(),
            ]);
        }
        try_exec(&tx, &insert).await.map_err(|err| {
            unique_violation(err, || {
                EventStoreError::constraint_violation(
                    batch[0].instance_id.clone(),
                    batch[0].unique_type.clone(),
                    "duplicate constraint in imported stream",
                )
            })
        })?;
        outcome.imported += batch.len() as u64;
    }
    tx.commit().await?;
    log::debug!(
        "imported {} constraints, removed {}",
        outcome.imported,
        outcome.removed
    );
    Ok(outcome)
}

async fn first_existing<C: ConnectionTrait>(
    conn: &C,
    batch: &[ConstraintRecord],
) -> EventStoreResult<Option<ConstraintRecord>> {
    let mut any = Condition::any();
    for record in batch {
        any = any.add(
            Condition::all()
                .add(Expr::col(UniqueConstraints::InstanceId).eq(record.instance_id.clone()))
                .add(Expr::col(UniqueConstraints::UniqueType).eq(record.unique_type.clone()))
                .add(Expr::col(UniqueConstraints::UniqueField).eq(record.unique_field.clone())),
        );
    }
    let select = Query::select()
        .columns(CONSTRAINT_COLUMNS)
        .from(UniqueConstraints::Table)
        .cond_where(any)
        .limit(1)
        .to_owned();
    query_all(conn, &select)
        .await?
        .first()
        .map(read_constraint)
        .transpose()
}
