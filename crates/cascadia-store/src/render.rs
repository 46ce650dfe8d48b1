use serde::{Deserialize, Serialize};

use cascadia_core::{ColumnDef, DataType, ForeignKeyDef, TableDef, Value};

use crate::statement::{Filter, Statement};

/// SQL flavour a store speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `$n` placeholders, `BIGSERIAL` identities, row locks.
    Postgres,
    /// `?` placeholders, `AUTOINCREMENT` identities, no row locks.
    Generic,
}

impl Dialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Generic => "?".to_string(),
        }
    }

    fn column_type(&self, column: &ColumnDef) -> &'static str {
        if column.auto_increment {
            return match self {
                Dialect::Postgres => "BIGSERIAL",
                Dialect::Generic => "INTEGER",
            };
        }
        match (self, column.data_type) {
            (_, DataType::String) => "VARCHAR(255)",
            (_, DataType::Text) => "TEXT",
            (Dialect::Postgres, DataType::Integer) => "BIGINT",
            (Dialect::Generic, DataType::Integer) => "INTEGER",
            (Dialect::Postgres, DataType::Float) => "DOUBLE PRECISION",
            (Dialect::Generic, DataType::Float) => "REAL",
            (_, DataType::Boolean) => "BOOLEAN",
        }
    }
}

/// SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Quote an identifier, preserving case.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Render a statement for `dialect`.
///
/// Null values are written inline as `NULL`; every other value becomes a
/// parameter.
pub fn render(statement: &Statement, dialect: Dialect) -> RenderedStatement {
    let mut writer = Writer {
        dialect,
        params: Vec::new(),
    };
    let sql = match statement {
        Statement::CreateTable {
            table,
            if_not_exists,
        } => create_table_sql(table, *if_not_exists, dialect),
        Statement::DropTable {
            table,
            if_exists,
            cascade,
        } => {
            let mut sql = String::from("DROP TABLE ");
            if *if_exists {
                sql.push_str("IF EXISTS ");
            }
            sql.push_str(&quote(table));
            if *cascade {
                sql.push_str(" CASCADE");
            }
            sql
        }
        Statement::AddForeignKey { table, foreign_key } => format!(
            "ALTER TABLE {} ADD {}",
            quote(table),
            foreign_key_clause(foreign_key)
        ),
        Statement::Insert { table, values } => {
            if values.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES RETURNING *", quote(table))
            } else {
                let columns: Vec<String> = values.iter().map(|(column, _)| quote(column)).collect();
                let slots: Vec<String> = values.iter().map(|(_, value)| writer.value(value)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                    quote(table),
                    columns.join(", "),
                    slots.join(", ")
                )
            }
        }
        Statement::Select {
            table,
            filter,
            order_by,
            limit,
            lock,
        } => {
            let mut sql = format!("SELECT * FROM {}", quote(table));
            sql.push_str(&writer.where_clause(filter));
            if let Some(column) = order_by {
                sql.push_str(&format!(" ORDER BY {}", quote(column)));
            }
            if let Some(limit) = limit {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
            if *lock && dialect == Dialect::Postgres {
                sql.push_str(" FOR UPDATE");
            }
            sql
        }
        Statement::Count { table, filter } => format!(
            "SELECT COUNT(*) AS \"count\" FROM {}{}",
            quote(table),
            writer.where_clause(filter)
        ),
        Statement::Update {
            table,
            assignments,
            filter,
        } => {
            let sets: Vec<String> = assignments
                .iter()
                .map(|(column, value)| format!("{} = {}", quote(column), writer.value(value)))
                .collect();
            format!(
                "UPDATE {} SET {}{}",
                quote(table),
                sets.join(", "),
                writer.where_clause(filter)
            )
        }
        Statement::Delete { table, filter } => format!(
            "DELETE FROM {}{}",
            quote(table),
            writer.where_clause(filter)
        ),
    };

    RenderedStatement {
        sql,
        params: writer.params,
    }
}

struct Writer {
    dialect: Dialect,
    params: Vec<Value>,
}

impl Writer {
    fn value(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(value.clone());
        self.dialect.placeholder(self.params.len())
    }

    fn where_clause(&mut self, filter: &Filter) -> String {
        if filter.is_empty() {
            return String::new();
        }
        let conditions: Vec<String> = filter
            .conditions()
            .iter()
            .map(|(column, value)| {
                if value.is_null() {
                    format!("{} IS NULL", quote(column))
                } else {
                    format!("{} = {}", quote(column), self.value(value))
                }
            })
            .collect();
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

fn create_table_sql(table: &TableDef, if_not_exists: bool, dialect: Dialect) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|column| column_sql(column, dialect))
        .collect();
    parts.extend(table.foreign_keys.iter().map(foreign_key_clause));

    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote(&table.name),
        parts.join(", ")
    )
}

fn column_sql(column: &ColumnDef, dialect: Dialect) -> String {
    let mut sql = format!("{} {}", quote(&column.name), dialect.column_type(column));
    if column.primary_key {
        sql.push_str(" PRIMARY KEY");
        if column.auto_increment && dialect == Dialect::Generic {
            sql.push_str(" AUTOINCREMENT");
        }
    } else if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    sql
}

/// `CONSTRAINT … FOREIGN KEY … REFERENCES …` clause. Default actions are
/// omitted.
pub fn foreign_key_clause(fk: &ForeignKeyDef) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote(&fk.name),
        quote(&fk.column),
        quote(&fk.referenced_table),
        quote(&fk.referenced_column)
    );
    if !fk.on_delete.is_default() {
        sql.push_str(&format!(" ON DELETE {}", fk.on_delete.sql()));
    }
    if !fk.on_update.is_default() {
        sql.push_str(&format!(" ON UPDATE {}", fk.on_update.sql()));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascadia_core::ReferentialAction;

    fn task_table() -> TableDef {
        let mut table = TableDef::new("Task");
        table.columns.push(ColumnDef::identity());
        table.columns.push(ColumnDef::new("title", DataType::String));
        table.columns.push(ColumnDef::new("UserId", DataType::Integer));
        table.foreign_keys.push(ForeignKeyDef {
            name: "Task_UserId_fkey".to_string(),
            column: "UserId".to_string(),
            referenced_table: "User".to_string(),
            referenced_column: "id".to_string(),
            on_delete: ReferentialAction::Cascade,
            on_update: ReferentialAction::NoAction,
        });
        table
    }

    #[test]
    fn renders_create_table_with_constraint() {
        let statement = Statement::CreateTable {
            table: task_table(),
            if_not_exists: true,
        };
        let rendered = render(&statement, Dialect::Postgres);
        assert_eq!(
            rendered.sql,
            "CREATE TABLE IF NOT EXISTS \"Task\" (\"id\" BIGSERIAL PRIMARY KEY, \"title\" VARCHAR(255), \"UserId\" BIGINT, CONSTRAINT \"Task_UserId_fkey\" FOREIGN KEY (\"UserId\") REFERENCES \"User\" (\"id\") ON DELETE CASCADE)"
        );
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn renders_both_actions_when_set() {
        let mut fk = task_table().foreign_keys.remove(0);
        fk.on_delete = ReferentialAction::Restrict;
        fk.on_update = ReferentialAction::SetNull;
        assert!(
            foreign_key_clause(&fk).ends_with("ON DELETE RESTRICT ON UPDATE SET NULL"),
            "{}",
            foreign_key_clause(&fk)
        );
    }

    #[test]
    fn nulls_render_inline() {
        let statement = Statement::Update {
            table: "Task".to_string(),
            assignments: vec![
                ("UserId".to_string(), Value::Null),
                ("title".to_string(), Value::from("done")),
            ],
            filter: Filter::new().eq("UserId", 7).eq("title", Value::Null),
        };
        let rendered = render(&statement, Dialect::Postgres);
        assert_eq!(
            rendered.sql,
            "UPDATE \"Task\" SET \"UserId\" = NULL, \"title\" = $1 WHERE \"UserId\" = $2 AND \"title\" IS NULL"
        );
        assert_eq!(rendered.params, vec![Value::from("done"), Value::Integer(7)]);
    }

    #[test]
    fn generic_dialect_uses_question_marks_and_no_locks() {
        let statement = Statement::Select {
            table: "User".to_string(),
            filter: Filter::by_id(1),
            order_by: Some("id".to_string()),
            limit: Some(1),
            lock: true,
        };
        let rendered = render(&statement, Dialect::Generic);
        assert_eq!(
            rendered.sql,
            "SELECT * FROM \"User\" WHERE \"id\" = ? ORDER BY \"id\" LIMIT 1"
        );
        assert_eq!(
            render(&statement, Dialect::Postgres).sql,
            "SELECT * FROM \"User\" WHERE \"id\" = $1 ORDER BY \"id\" LIMIT 1 FOR UPDATE"
        );
    }

    #[test]
    fn insert_without_values_uses_defaults() {
        let statement = Statement::Insert {
            table: "User".to_string(),
            values: Vec::new(),
        };
        assert_eq!(
            render(&statement, Dialect::Postgres).sql,
            "INSERT INTO \"User\" DEFAULT VALUES RETURNING *"
        );
    }
}
