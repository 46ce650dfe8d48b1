use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use cascadia_core::{Result, Row, TableDef};

use crate::adapter::{AtomicUnit, Capabilities, Store};
use crate::render::{Dialect, render};
use crate::statement::{QueryResult, Statement};

mod database;
mod enforce;

use database::Database;

/// Feature switches for the in-memory store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOptions {
    pub native_foreign_key_actions: bool,
    pub deferred_constraints: bool,
    pub transactions: bool,
}

impl MemoryOptions {
    /// Store that enforces constraints itself and accepts deferred
    /// constraint attachment.
    pub fn native() -> Self {
        Self {
            native_foreign_key_actions: true,
            deferred_constraints: true,
            transactions: true,
        }
    }

    /// Store without constraint support; referential actions must be
    /// emulated.
    pub fn emulated() -> Self {
        Self {
            native_foreign_key_actions: false,
            deferred_constraints: false,
            transactions: true,
        }
    }

    pub fn without_deferred_constraints(mut self) -> Self {
        self.deferred_constraints = false;
        self
    }

    /// Units apply statements immediately and cannot roll back.
    pub fn without_transactions(mut self) -> Self {
        self.transactions = false;
        self
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_foreign_key_actions: self.native_foreign_key_actions,
            deferred_constraints: self.deferred_constraints,
            transactions: self.transactions,
        }
    }
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self::native()
    }
}

/// Store keeping every table in process memory.
///
/// Atomic units hold an exclusive lock for their whole lifetime and keep a
/// snapshot to restore on rollback.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<Database>>,
    options: MemoryOptions,
}

impl MemoryStore {
    pub fn new(options: MemoryOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(Database::default())),
            options,
        }
    }

    pub fn native() -> Self {
        Self::new(MemoryOptions::native())
    }

    pub fn emulated() -> Self {
        Self::new(MemoryOptions::emulated())
    }

    pub fn options(&self) -> MemoryOptions {
        self.options
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.state.lock().await.table_names()
    }

    /// Every stored row of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().await.rows(table)
    }
}

fn log_statement(statement: &Statement) {
    tracing::debug!(
        event = "statement",
        engine = "memory",
        kind = statement.kind(),
        table = statement.table(),
        sql = %render(statement, Dialect::Generic).sql,
    );
}

#[async_trait]
impl Store for MemoryStore {
    fn engine(&self) -> &'static str {
        "memory"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Generic
    }

    fn capabilities(&self) -> Capabilities {
        self.options.capabilities()
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult> {
        log_statement(statement);
        let mut database = self.state.lock().await;
        Ok(database.apply(statement, self.options.native_foreign_key_actions)?)
    }

    async fn begin(&self) -> Result<Box<dyn AtomicUnit>> {
        if !self.options.transactions {
            return Ok(Box::new(PassThroughUnit {
                store: self.clone(),
            }));
        }

        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = Database::clone(&guard);
        Ok(Box::new(MemoryUnit {
            guard,
            snapshot: Some(snapshot),
            native: self.options.native_foreign_key_actions,
        }))
    }

    async fn describe(&self, table: &str) -> Result<Option<TableDef>> {
        Ok(self.state.lock().await.describe(table))
    }
}

/// Holds the store lock until finished. A unit dropped without commit or
/// rollback restores its snapshot.
struct MemoryUnit {
    guard: OwnedMutexGuard<Database>,
    snapshot: Option<Database>,
    native: bool,
}

impl MemoryUnit {
    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if self.snapshot.is_some() {
            tracing::warn!(event = "unit_abandoned", engine = "memory");
            self.restore();
        }
    }
}

#[async_trait]
impl AtomicUnit for MemoryUnit {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        log_statement(statement);
        Ok(self.guard.apply(statement, self.native)?)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut unit = self;
        unit.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut unit = self;
        unit.restore();
        Ok(())
    }
}

/// Unit for stores without transactions: each statement commits on its own.
struct PassThroughUnit {
    store: MemoryStore,
}

#[async_trait]
impl AtomicUnit for PassThroughUnit {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        self.store.execute(statement).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::warn!(
            event = "rollback_unsupported",
            engine = "memory",
            "store has no transactions; statements already applied are kept"
        );
        Ok(())
    }
}
