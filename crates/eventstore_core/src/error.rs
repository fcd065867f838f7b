use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which end of a bulk transfer failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopySide {
    Source,
    Destination,
}

impl fmt::Display for CopySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopySide::Source => f.write_str("source"),
            CopySide::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("connection error: {message}")]
    Connection { message: String },
    #[error("unique constraint violated ({unique_type} in instance '{instance}'): {message}")]
    ConstraintViolation {
        instance: String,
        unique_type: String,
        message: String,
    },
    /// Another append claimed the same position or aggregate sequence first.
    /// The append was rolled back and may be retried as is.
    #[error("write conflict in instance '{instance}': {message}")]
    WriteConflict { instance: String, message: String },
    #[error("query build error: {message}")]
    QueryBuild { message: String },
    #[error("copy stream error on {side}: {message}")]
    CopyStream { side: CopySide, message: String },
    #[error("migration state error: {message}")]
    MigrationState { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
}

impl EventStoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn constraint_violation(
        instance: impl Into<String>,
        unique_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConstraintViolation {
            instance: instance.into(),
            unique_type: unique_type.into(),
            message: message.into(),
        }
    }

    pub fn write_conflict(instance: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WriteConflict {
            instance: instance.into(),
            message: message.into(),
        }
    }

    pub fn query_build(message: impl Into<String>) -> Self {
        Self::QueryBuild {
            message: message.into(),
        }
    }

    pub fn copy_stream(side: CopySide, message: impl Into<String>) -> Self {
        Self::CopyStream {
            side,
            message: message.into(),
        }
    }

    pub fn source(message: impl Into<String>) -> Self {
        Self::copy_stream(CopySide::Source, message)
    }

    pub fn destination(message: impl Into<String>) -> Self {
        Self::copy_stream(CopySide::Destination, message)
    }

    pub fn migration_state(message: impl Into<String>) -> Self {
        Self::MigrationState {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether repeating the failed call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    /// Side of a failed bulk transfer, if this error came from one.
    pub fn copy_side(&self) -> Option<CopySide> {
        match self {
            Self::CopyStream { side, .. } => Some(*side),
            _ => None,
        }
    }

    /// Re-tags any error as a copy failure on `side`, keeping copy errors that
    /// already carry a side and constraint violations as they are.
    pub fn on_side(self, side: CopySide) -> Self {
        match self {
            Self::CopyStream { .. } | Self::ConstraintViolation { .. } => self,
            other => Self::copy_stream(side, other.to_string()),
        }
    }
}

pub type EventStoreResult<T> = Result<T, EventStoreError>;

impl From<sea_orm::DbErr> for EventStoreError {
    fn from(value: sea_orm::DbErr) -> Self {
        match value {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                EventStoreError::connection(value.to_string())
            }
            other => EventStoreError::storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EventStoreError {
    fn from(value: serde_json::Error) -> Self {
        EventStoreError::storage(format!("json: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{CopySide, EventStoreError};

    #[test]
    fn helper_constructors_set_variants() {
        let err = EventStoreError::connection("refused");
        assert!(matches!(err, EventStoreError::Connection { .. }));
        let err = EventStoreError::constraint_violation("inst", "username", "taken");
        assert!(matches!(err, EventStoreError::ConstraintViolation { .. }));
        let err = EventStoreError::query_build("no filters");
        assert!(matches!(err, EventStoreError::QueryBuild { .. }));
        assert!(!err.is_retryable());
        let err = EventStoreError::write_conflict("inst", "position taken");
        assert!(matches!(err, EventStoreError::WriteConflict { .. }));
        assert!(err.is_retryable());
        let err = EventStoreError::source("closed");
        assert_eq!(err.copy_side(), Some(CopySide::Source));
        let err = EventStoreError::destination("closed");
        assert_eq!(err.copy_side(), Some(CopySide::Destination));
        let err = EventStoreError::migration_state("marker");
        assert!(matches!(err, EventStoreError::MigrationState { .. }));
        let err = EventStoreError::storage("disk");
        assert!(matches!(err, EventStoreError::Storage { .. }));
        let err = EventStoreError::validation("bad");
        assert!(matches!(err, EventStoreError::Validation { .. }));
    }

    #[test]
    fn on_side_keeps_existing_side() {
        let err = EventStoreError::source("eof").on_side(CopySide::Destination);
        assert_eq!(err.copy_side(), Some(CopySide::Source));
        let err = EventStoreError::storage("locked").on_side(CopySide::Destination);
        assert_eq!(err.copy_side(), Some(CopySide::Destination));
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn connection_db_errors_map_to_connection() {
        let err: EventStoreError =
            sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal("refused".into())).into();
        assert!(matches!(err, EventStoreError::Connection { .. }));
    }
}
