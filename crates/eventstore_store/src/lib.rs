pub mod bulk;
pub mod config;
pub mod copy;
mod db;
pub mod migration;
mod push;
pub mod query;
pub mod store;

pub use config::{DatabaseConfig, MigrationConfig, PoolConfig, StoreConfig};
pub use copy::{
    ConstraintCopyReport, CopyOptions, EventCopyReport, EventstoreCopyReport, copy_events,
    copy_eventstore, copy_unique_constraints, last_successful_migration, migrate,
};
pub use eventstore_core::*;
pub use query::{compile, query_with};
pub use store::{ClockFlavor, EventStore};
