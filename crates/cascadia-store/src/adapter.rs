use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use cascadia_core::{Result, TableDef};

use crate::render::Dialect;
use crate::statement::{QueryResult, Statement};

/// Features a store reports once, at session construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// The store enforces `ON DELETE` / `ON UPDATE` actions itself.
    pub native_foreign_key_actions: bool,
    /// Constraints can be attached after table creation.
    pub deferred_constraints: bool,
    /// Atomic units can be rolled back.
    pub transactions: bool,
}

/// Trait implemented by persistence backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the engine identifier (e.g. `postgres`).
    fn engine(&self) -> &'static str;

    fn dialect(&self) -> Dialect;

    fn capabilities(&self) -> Capabilities;

    /// Execute one statement outside any atomic unit.
    async fn execute(&self, statement: &Statement) -> Result<QueryResult>;

    /// Open an atomic unit. Statements executed through it commit or roll
    /// back together.
    async fn begin(&self) -> Result<Box<dyn AtomicUnit>>;

    /// Physical definition of `table`, or `None` when it does not exist.
    async fn describe(&self, table: &str) -> Result<Option<TableDef>>;
}

/// Transaction abstraction for one operation.
#[async_trait]
pub trait AtomicUnit: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
