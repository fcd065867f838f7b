//! Wire format between the bulk export of one store and the bulk import of
//! another.
//!
//! The stream is newline-delimited JSON: one `row` frame per record followed
//! by exactly one `footer` frame carrying the row count and a blake3 checksum
//! over the row lines. A producer writes the footer only after its export
//! succeeded, so a reader that saw a valid footer knows the stream is complete.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::{
    Event, EventStoreError, EventStoreResult, Position, created_at_from_micros, created_at_micros,
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame<T> {
    Row(T),
    Footer { rows: u64, checksum: String },
}

/// One event as it travels between stores, in table column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub instance_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub sequence: u64,
    pub revision: u16,
    /// Unix microseconds.
    pub created_at: i64,
    /// JSON text.
    pub payload: Option<String>,
    pub creator: String,
    pub owner: String,
    pub position: f64,
    pub in_tx_order: u32,
}

impl EventRecord {
    pub fn from_event(event: &Event) -> EventStoreResult<Self> {
        let payload = event
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        Ok(Self {
            instance_id: event.instance_id.clone(),
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id.clone(),
            event_type: event.event_type.clone(),
            sequence: event.sequence,
            revision: event.revision,
            created_at: created_at_micros(event.created_at),
            payload,
            creator: event.creator.clone(),
            owner: event.owner.clone(),
            position: event.position.value,
            in_tx_order: event.position.in_tx_order,
        })
    }

    pub fn into_event(self) -> EventStoreResult<Event> {
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Event {
            instance_id: self.instance_id,
            owner: self.owner,
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            revision: self.revision,
            sequence: self.sequence,
            created_at: created_at_from_micros(self.created_at)?,
            creator: self.creator,
            payload,
            position: Position::new(self.position, self.in_tx_order),
        })
    }

    pub fn position(&self) -> Position {
        Position::new(self.position, self.in_tx_order)
    }
}

/// Removes NUL characters, raw or JSON-escaped, from payload text.
pub fn strip_nul(payload: &str) -> String {
    payload.replace("\\u0000", "").replace('\0', "")
}

/// What a source exports.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportWindow {
    /// Instances to export; empty exports all of them.
    pub instances: Vec<String>,
    /// Exclusive lower bound on `position.value`.
    pub after: Position,
    /// Inclusive upper bound on `position.value`.
    pub until: Position,
    /// Destination clock value stamped on every exported row. Tie-breaks are
    /// renumbered per instance in source order.
    pub rebase_to: Option<f64>,
    pub batch_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportOptions {
    pub batch_size: u64,
}

/// Constraint import into a destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintImport {
    pub instances: Vec<String>,
    /// Delete the destination's constraints of `instances` (all when empty)
    /// before importing.
    pub replace: bool,
    pub batch_size: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstraintImportOutcome {
    pub imported: u64,
    pub removed: u64,
}

/// Writes row frames and finishes the stream with its footer.
pub struct FrameWriter<W> {
    writer: W,
    hasher: blake3::Hasher,
    rows: u64,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: blake3::Hasher::new(),
            rows: 0,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub async fn write_row<T: Serialize>(&mut self, row: &T) -> EventStoreResult<()> {
        let mut line = serde_json::to_vec(&Frame::Row(row))?;
        self.hasher.update(&line);
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|err| EventStoreError::source(format!("write row: {err}")))?;
        self.rows += 1;
        Ok(())
    }

    /// Writes the footer and closes the stream; returns the row count.
    pub async fn finish(mut self) -> EventStoreResult<u64> {
        let footer: Frame<()> = Frame::Footer {
            rows: self.rows,
            checksum: self.hasher.finalize().to_hex().to_string(),
        };
        let mut line = serde_json::to_vec(&footer)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|err| EventStoreError::source(format!("write footer: {err}")))?;
        self.writer
            .shutdown()
            .await
            .map_err(|err| EventStoreError::source(format!("close stream: {err}")))?;
        Ok(self.rows)
    }
}

/// Reads row frames and verifies the footer.
pub struct FrameReader<R> {
    lines: Lines<R>,
    hasher: blake3::Hasher,
    rows: u64,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin + Send> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            hasher: blake3::Hasher::new(),
            rows: 0,
            finished: false,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Next row, or `None` once a valid footer was read.
    pub async fn next_row<T: DeserializeOwned>(&mut self) -> EventStoreResult<Option<T>> {
        if self.finished {
            return Ok(None);
        }
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|err| EventStoreError::source(format!("read stream: {err}")))?
            .ok_or_else(|| EventStoreError::source("stream ended without footer"))?;
        let frame: Frame<T> = serde_json::from_str(&line)
            .map_err(|err| EventStoreError::source(format!("malformed frame: {err}")))?;
        match frame {
            Frame::Row(row) => {
                self.hasher.update(line.as_bytes());
                self.rows += 1;
                Ok(Some(row))
            }
            Frame::Footer { rows, checksum } => {
                if rows != self.rows {
                    return Err(EventStoreError::source(format!(
                        "footer announces {rows} rows, received {}",
                        self.rows
                    )));
                }
                if checksum != self.hasher.finalize().to_hex().as_str() {
                    return Err(EventStoreError::source("stream checksum mismatch"));
                }
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Up to `max` rows; an empty batch means the stream is complete.
    pub async fn next_batch<T: DeserializeOwned>(
        &mut self,
        max: usize,
    ) -> EventStoreResult<Vec<T>> {
        let mut batch = Vec::new();
        while batch.len() < max.max(1) {
            match self.next_row().await? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        Ok(batch)
    }
}
