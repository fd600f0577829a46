//! Storage layer - connection-owning code
//!
//! - `proxy`: the serialized writer thread and its task handles
//! - `sqlite`: the manager tying schemas, statements and connections together

pub mod proxy;
pub mod sqlite;

pub use proxy::{PendingTask, WriteProxy};
pub use sqlite::{BatchOutcome, SqliteDb};
