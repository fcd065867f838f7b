use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Command, ConstraintImport, ConstraintImportOutcome, Event, EventStoreResult, ExportWindow,
    ImportOptions, Position, Query, Reducer, UniqueConstraint,
};

#[async_trait]
pub trait EventPusher: Send + Sync {
    /// Appends `commands` and applies `constraints` in one transaction.
    ///
    /// Every command must belong to `instance`. Returns the committed events in
    /// command order.
    async fn append(
        &self,
        instance: &str,
        commands: Vec<Command>,
        constraints: Vec<UniqueConstraint>,
    ) -> EventStoreResult<Vec<Event>>;
}

#[async_trait]
pub trait EventQuerier: Send + Sync {
    /// Feeds every matching event to `reducer` in position order and returns
    /// how many were reduced.
    async fn query<R>(&self, query: &Query, reducer: &mut R) -> EventStoreResult<usize>
    where
        R: Reducer + Send + ?Sized;
}

#[async_trait]
pub trait PositionClock: Send + Sync {
    /// Current reading of the database clock.
    async fn current_position(&self) -> EventStoreResult<Position>;

    /// Clock value placing new rows after every stored event.
    async fn next_position(&self) -> EventStoreResult<Position>;
}

/// Streaming bulk export and import of the event and constraint tables.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    /// Writes the events of `window` to `writer`, ordered by instance and
    /// position, and finishes the stream. Returns the number of rows written.
    async fn export_events<W>(&self, window: &ExportWindow, writer: W) -> EventStoreResult<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static;

    /// Imports an exported event stream in one transaction, committing only
    /// after the stream was verified complete.
    async fn import_events<R>(&self, reader: R, options: &ImportOptions) -> EventStoreResult<u64>
    where
        R: AsyncRead + Unpin + Send + 'static;

    /// Writes the constraints of `instances` (all when empty) to `writer`,
    /// reading `batch_size` rows per page.
    async fn export_constraints<W>(
        &self,
        instances: &[String],
        batch_size: u64,
        writer: W,
    ) -> EventStoreResult<u64>
    where
        W: AsyncWrite + Unpin + Send + 'static;

    async fn import_constraints<R>(
        &self,
        reader: R,
        options: &ConstraintImport,
    ) -> EventStoreResult<ConstraintImportOutcome>
    where
        R: AsyncRead + Unpin + Send + 'static;
}
