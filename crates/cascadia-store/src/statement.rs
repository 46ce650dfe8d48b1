use cascadia_core::{ForeignKeyDef, IDENTITY_COLUMN, Row, TableDef, Value};

/// Conjunction of column equality conditions.
///
/// A `Null` condition matches SQL `IS NULL`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: i64) -> Self {
        Self::new().eq(IDENTITY_COLUMN, id)
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), value.into()));
        self
    }

    pub fn from_row(row: &Row) -> Self {
        Self {
            conditions: row
                .iter()
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against a stored row.
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|(column, expected)| {
            let actual = row.get(column).unwrap_or(&Value::Null);
            if expected.is_null() {
                actual.is_null()
            } else {
                actual.sql_eq(expected)
            }
        })
    }
}

/// Dialect-neutral statement vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        table: TableDef,
        if_not_exists: bool,
    },
    DropTable {
        table: String,
        if_exists: bool,
        /// Also remove constraints in other tables that reference this one.
        cascade: bool,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeyDef,
    },
    /// Returns the inserted row.
    Insert {
        table: String,
        values: Vec<(String, Value)>,
    },
    Select {
        table: String,
        filter: Filter,
        order_by: Option<String>,
        limit: Option<u64>,
        /// Lock matching rows until the atomic unit ends.
        lock: bool,
    },
    /// Returns a single row with a `count` column.
    Count {
        table: String,
        filter: Filter,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Filter,
    },
    Delete {
        table: String,
        filter: Filter,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::CreateTable { table, .. } => &table.name,
            Statement::DropTable { table, .. }
            | Statement::AddForeignKey { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Select { table, .. }
            | Statement::Count { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Short label used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateTable { .. } => "create_table",
            Statement::DropTable { .. } => "drop_table",
            Statement::AddForeignKey { .. } => "add_foreign_key",
            Statement::Insert { .. } => "insert",
            Statement::Select { .. } => "select",
            Statement::Count { .. } => "count",
            Statement::Update { .. } => "update",
            Statement::Delete { .. } => "delete",
        }
    }

    /// Whether the statement produces rows.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            Statement::Insert { .. } | Statement::Select { .. } | Statement::Count { .. }
        )
    }
}

/// Result of one executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            rows,
            rows_affected,
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }

    /// Value of the `count` column produced by a `Count` statement.
    pub fn count(&self) -> u64 {
        self.rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .map_or(0, |count| count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_condition_matches_missing_and_null() {
        let filter = Filter::new().eq("UserId", Value::Null);
        let mut row = Row::new();
        assert!(filter.matches(&row));
        row.insert("UserId".to_string(), Value::Integer(1));
        assert!(!filter.matches(&row));
    }

    #[test]
    fn count_reads_count_column() {
        let mut row = Row::new();
        row.insert("count".to_string(), Value::Integer(3));
        assert_eq!(QueryResult::with_rows(vec![row]).count(), 3);
        assert_eq!(QueryResult::default().count(), 0);
    }
}
