use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};

use cascadia_core::{Result, StoreError, StoreErrorKind, TableDef, Value};

use crate::adapter::{AtomicUnit, Capabilities, Store};
use crate::render::{Dialect, render};
use crate::statement::{QueryResult, Statement};

mod mapper;
mod queries;

/// Store backed by a PostgreSQL database.
///
/// Referential actions are enforced by the database; units are database
/// transactions.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store using a pre-configured pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool to `url`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_foreign_key_actions: true,
            deferred_constraints: true,
            transactions: true,
        }
    }

    async fn execute(&self, statement: &Statement) -> Result<QueryResult> {
        run_statement(&self.pool, statement).await
    }

    async fn begin(&self) -> Result<Box<dyn AtomicUnit>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PostgresUnit { tx }))
    }

    async fn describe(&self, table: &str) -> Result<Option<TableDef>> {
        let columns = queries::list_columns(&self.pool, table).await?;
        if columns.is_empty() {
            return Ok(None);
        }
        let foreign_keys = queries::list_foreign_keys(&self.pool, table).await?;
        Ok(Some(TableDef {
            name: table.to_string(),
            columns: mapper::map_columns(columns),
            foreign_keys: mapper::map_foreign_keys(foreign_keys),
        }))
    }
}

struct PostgresUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AtomicUnit for PostgresUnit {
    async fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        run_statement(&mut *self.tx, statement).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        Ok(())
    }
}

async fn run_statement<'e, E>(executor: E, statement: &Statement) -> Result<QueryResult>
where
    E: PgExecutor<'e>,
{
    let rendered = render(statement, Dialect::Postgres);
    tracing::debug!(
        event = "statement",
        engine = "postgres",
        kind = statement.kind(),
        table = statement.table(),
        sql = %rendered.sql,
    );

    let mut query = sqlx::query(&rendered.sql);
    for value in &rendered.params {
        query = bind_value(query, value);
    }

    if statement.returns_rows() {
        let rows = query.fetch_all(executor).await.map_err(map_sqlx_error)?;
        let rows = rows
            .iter()
            .map(mapper::decode_row)
            .collect::<std::result::Result<Vec<_>, StoreError>>()?;
        Ok(QueryResult::with_rows(rows))
    } else {
        let done = query.execute(executor).await.map_err(map_sqlx_error)?;
        Ok(QueryResult::affected(done.rows_affected()))
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        // `render` writes nulls inline, so this arm only serves direct callers.
        Value::Null => query.bind(None::<i64>),
        Value::Bool(value) => query.bind(*value),
        Value::Integer(value) => query.bind(*value),
        Value::Float(value) => query.bind(*value),
        Value::Text(value) => query.bind(value.clone()),
    }
}

/// Map a driver error onto the store error taxonomy by SQLSTATE.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let kind = match db.code().as_deref() {
                Some("23503") => StoreErrorKind::ForeignKeyViolation,
                Some("23505") => StoreErrorKind::UniqueViolation,
                Some("23502") => StoreErrorKind::NotNullViolation,
                Some("42P01") => StoreErrorKind::UndefinedTable,
                Some("42P07") => StoreErrorKind::DuplicateTable,
                Some("2BP01") => StoreErrorKind::DependentObjects,
                _ => StoreErrorKind::Internal,
            };
            StoreError::new(kind, db.message())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::new(StoreErrorKind::Connection, err.to_string())
        }
        sqlx::Error::PoolClosed => StoreError::new(StoreErrorKind::Closed, err.to_string()),
        _ => StoreError::internal(err.to_string()),
    }
}
