pub mod api;
pub mod constraint;
pub mod error;
pub mod event;
pub mod ids;
pub mod marker;
pub mod position;
pub mod projection;
pub mod query;
pub mod reducer;
pub mod transfer;

pub use api::*;
pub use constraint::*;
pub use error::{CopySide, EventStoreError, EventStoreResult};
pub use event::*;
pub use ids::*;
pub use marker::*;
pub use position::*;
pub use projection::*;
pub use query::*;
pub use reducer::*;
pub use transfer::*;
