//! Copies the event log and the constraint index of one store into another.
//!
//! A producer task exports from the source into an in-process pipe while the
//! calling task imports from it into the destination. Before the producer
//! starts, the destination hands over the clock value the copied rows are
//! placed at. Progress is recorded as marker events in the destination's own
//! log.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{EventStore, MigrationConfig};
use eventstore_core::{
    BulkTransfer, ConstraintImport, CopySide, EventPusher, EventQuerier, EventStoreError,
    EventStoreResult, ExportWindow, ImportOptions, LastMigration, MigrationDone, MigrationHistory,
    MigrationId, MigrationStarted, Position, PositionClock, SYSTEM_INSTANCE, marker_query,
};

/// Per-run settings of the copy engine.
#[derive(Clone, Debug, PartialEq)]
pub struct CopyOptions {
    /// Name of the destination recorded in its markers.
    pub destination: String,
    pub instance_ids: Vec<String>,
    pub replace_constraints: bool,
    pub ignore_previous_migrations: bool,
    pub batch_size: u64,
    pub pipe_capacity: usize,
}

impl CopyOptions {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            instance_ids: Vec::new(),
            replace_constraints: false,
            ignore_previous_migrations: false,
            batch_size: 500,
            pipe_capacity: 64 * 1024,
        }
    }

    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            destination: config.destination.database_name(),
            instance_ids: config.instance_ids.clone(),
            replace_constraints: config.replace_constraints,
            ignore_previous_migrations: config.ignore_previous_migrations,
            batch_size: config.batch_size,
            pipe_capacity: config.pipe_capacity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventCopyReport {
    pub migration_id: MigrationId,
    pub previous_watermark: Position,
    pub target_position: Position,
    pub events_copied: u64,
    pub took: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConstraintCopyReport {
    pub copied: u64,
    pub removed: u64,
    pub took: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventstoreCopyReport {
    pub events: EventCopyReport,
    pub constraints: ConstraintCopyReport,
}

/// Aborts the producer when the copy is dropped before it finished.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Newest successful migration into `destination_name`, read from the
/// markers in `destination`.
pub async fn last_successful_migration<D>(
    destination: &D,
    destination_name: &str,
) -> EventStoreResult<Option<LastMigration>>
where
    D: EventQuerier,
{
    let mut history = MigrationHistory::new(destination_name);
    destination
        .query(&marker_query(), &mut history)
        .await
        .map_err(|err| EventStoreError::migration_state(format!("read markers: {err}")))?;
    Ok(history.into_last())
}

/// Copies every event after the last successful watermark up to the source's
/// current position and records the run in the destination.
pub async fn copy_events<S, D>(
    source: &S,
    destination: &D,
    options: &CopyOptions,
) -> EventStoreResult<EventCopyReport>
where
    S: BulkTransfer + PositionClock + Clone + 'static,
    D: EventPusher + EventQuerier + PositionClock + BulkTransfer,
{
    let start = Instant::now();
    let migration_id = MigrationId::new();
    let previous_watermark = if options.ignore_previous_migrations {
        Position::ORIGIN
    } else {
        last_successful_migration(destination, &options.destination)
            .await?
            .map(|last| last.target_position)
            .unwrap_or(Position::ORIGIN)
    };
    let target_position = source
        .current_position()
        .await
        .map_err(|err| err.on_side(CopySide::Source))?;
    log::info!(
        "migrate events: id={migration_id} from={previous_watermark} to={target_position}"
    );

    let started = MigrationStarted {
        migration_id,
        destination: options.destination.clone(),
        previous_watermark,
        target_position,
    };
    destination
        .append(SYSTEM_INSTANCE, vec![started.command()?], Vec::new())
        .await
        .map_err(|err| EventStoreError::migration_state(format!("write started marker: {err}")))?;

    let result = transfer_events(
        source,
        destination,
        options,
        previous_watermark,
        target_position,
    )
    .await;

    let done = match &result {
        Ok(_) => MigrationDone::success(migration_id, options.destination.clone()),
        Err(err) => {
            MigrationDone::failed(migration_id, options.destination.clone(), err.to_string())
        }
    };
    let marker = match done.command() {
        Ok(command) => destination
            .append(SYSTEM_INSTANCE, vec![command], Vec::new())
            .await
            .map(|_| ()),
        Err(err) => Err(err),
    };

    match (result, marker) {
        (Ok(events_copied), Ok(())) => {
            let took = start.elapsed();
            log::info!("migrate events done: took={took:?} count={events_copied}");
            Ok(EventCopyReport {
                migration_id,
                previous_watermark,
                target_position,
                events_copied,
                took,
            })
        }
        (Ok(_), Err(err)) => {
            log::error!("unable to write done marker: {err}");
            Err(EventStoreError::migration_state(format!(
                "write done marker: {err}"
            )))
        }
        (Err(err), marker) => {
            if let Err(marker_err) = marker {
                log::error!("unable to write failed marker: {marker_err}");
            }
            log::error!("migrate events failed: {err}");
            Err(err)
        }
    }
}

async fn transfer_events<S, D>(
    source: &S,
    destination: &D,
    options: &CopyOptions,
    previous_watermark: Position,
    target_position: Position,
) -> EventStoreResult<u64>
where
    S: BulkTransfer + Clone + 'static,
    D: PositionClock + BulkTransfer,
{
    let (writer, reader) = tokio::io::duplex(options.pipe_capacity.max(1));
    let (rebase_tx, rebase_rx) = oneshot::channel::<f64>();
    let (result_tx, result_rx) = oneshot::channel::<EventStoreResult<u64>>();
    let window = ExportWindow {
        instances: options.instance_ids.clone(),
        after: previous_watermark,
        until: target_position,
        rebase_to: None,
        batch_size: options.batch_size,
    };
    let producer = source.clone();
    let _producer = AbortOnDrop(tokio::spawn(async move {
        let result = match rebase_rx.await {
            Ok(value) => {
                let window = ExportWindow {
                    rebase_to: Some(value),
                    ..window
                };
                producer.export_events(&window, writer).await
            }
            Err(_) => Err(EventStoreError::source(
                "destination position was never handed over",
            )),
        };
        if let Err(err) = &result {
            log::error!("unable to copy events from source: {err}");
        }
        let _ = result_tx.send(result);
    }));

    let imported = async move {
        let rebase = destination
            .next_position()
            .await
            .map_err(|err| err.on_side(CopySide::Destination))?;
        rebase_tx
            .send(rebase.value)
            .map_err(|_| EventStoreError::source("producer stopped before the rendezvous"))?;
        destination
            .import_events(
                reader,
                &ImportOptions {
                    batch_size: options.batch_size,
                },
            )
            .await
    }
    .await;
    if let Err(err) = &imported {
        log::error!("unable to copy events into destination: {err}");
    }

    let exported = result_rx
        .await
        .unwrap_or_else(|_| Err(EventStoreError::source("producer task stopped")));
    resolve(exported, imported)
}

/// Picks the error a failed transfer reports: the source's when the import
/// failed on a broken stream, the destination's otherwise.
fn resolve(
    exported: EventStoreResult<u64>,
    imported: EventStoreResult<u64>,
) -> EventStoreResult<u64> {
    match (exported, imported) {
        (Ok(exported), Ok(imported)) if exported == imported => Ok(imported),
        (Ok(exported), Ok(imported)) => Err(EventStoreError::source(format!(
            "exported {exported} rows but imported {imported}"
        ))),
        (Err(source), Ok(_)) => Err(source),
        (Err(source), Err(imported)) if imported.copy_side() == Some(CopySide::Source) => {
            Err(source)
        }
        (_, Err(imported)) => Err(imported),
    }
}

/// Copies the constraint snapshot of the configured instances.
pub async fn copy_unique_constraints<S, D>(
    source: &S,
    destination: &D,
    options: &CopyOptions,
) -> EventStoreResult<ConstraintCopyReport>
where
    S: BulkTransfer + Clone + 'static,
    D: BulkTransfer,
{
    let start = Instant::now();
    let (writer, reader) = tokio::io::duplex(options.pipe_capacity.max(1));
    let (result_tx, result_rx) = oneshot::channel::<EventStoreResult<u64>>();
    let producer = source.clone();
    let instances = options.instance_ids.clone();
    let batch_size = options.batch_size;
    let _producer = AbortOnDrop(tokio::spawn(async move {
        let result = producer
            .export_constraints(&instances, batch_size, writer)
            .await;
        if let Err(err) = &result {
            log::error!("unable to copy unique constraints from source: {err}");
        }
        let _ = result_tx.send(result);
    }));

    let imported = destination
        .import_constraints(
            reader,
            &ConstraintImport {
                instances: options.instance_ids.clone(),
                replace: options.replace_constraints,
                batch_size: options.batch_size,
            },
        )
        .await;
    if let Err(err) = &imported {
        log::error!("unable to copy unique constraints to destination: {err}");
    }
    let exported = result_rx
        .await
        .unwrap_or_else(|_| Err(EventStoreError::source("producer task stopped")));
    let outcome = match (exported, imported) {
        (Ok(_), Ok(outcome)) => outcome,
        (Err(source), Ok(_)) => return Err(source),
        (Err(source), Err(imported)) if imported.copy_side() == Some(CopySide::Source) => {
            return Err(source);
        }
        (_, Err(imported)) => return Err(imported),
    };
    let took = start.elapsed();
    log::info!(
        "unique constraints migrated: took={took:?} count={} removed={}",
        outcome.imported,
        outcome.removed
    );
    Ok(ConstraintCopyReport {
        copied: outcome.imported,
        removed: outcome.removed,
        took,
    })
}

/// Copies events, then unique constraints.
pub async fn copy_eventstore<S, D>(
    source: &S,
    destination: &D,
    options: &CopyOptions,
) -> EventStoreResult<EventstoreCopyReport>
where
    S: BulkTransfer + PositionClock + Clone + 'static,
    D: EventPusher + EventQuerier + PositionClock + BulkTransfer,
{
    let events = copy_events(source, destination, options).await?;
    let constraints = copy_unique_constraints(source, destination, options).await?;
    Ok(EventstoreCopyReport {
        events,
        constraints,
    })
}

/// Connects both stores of `config` and copies events and constraints.
pub async fn migrate(
    config: &MigrationConfig,
    base_dir: &Path,
) -> EventStoreResult<EventstoreCopyReport> {
    config.validate()?;
    let source = EventStore::connect(&config.source, base_dir)
        .await
        .map_err(|err| EventStoreError::connection(format!("source: {err}")))?;
    let destination = EventStore::connect(&config.destination, base_dir)
        .await
        .map_err(|err| EventStoreError::connection(format!("destination: {err}")))?;
    copy_eventstore(&source, &destination, &CopyOptions::from_config(config)).await
}
