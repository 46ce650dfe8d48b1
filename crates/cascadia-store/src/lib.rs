//! Store boundary for Cascadia.
//!
//! Statements are built in a dialect-neutral vocabulary and rendered to SQL
//! by each adapter. Two adapters ship with the crate: an in-memory store used
//! by tests and previews, and a PostgreSQL store backed by `sqlx`.

pub mod adapter;
pub mod memory;
pub mod postgres;
pub mod render;
pub mod statement;

pub use adapter::{AtomicUnit, Capabilities, Store};
pub use memory::{MemoryOptions, MemoryStore};
pub use postgres::PostgresStore;
pub use render::{Dialect, RenderedStatement, render};
pub use statement::{Filter, QueryResult, Statement};
