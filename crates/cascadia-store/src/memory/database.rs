use std::cmp::Ordering;
use std::collections::BTreeMap;

use cascadia_core::{
    ColumnDef, DataType, ForeignKeyDef, Row, StoreError, StoreErrorKind, TableDef, Value,
};

use crate::statement::{Filter, QueryResult, Statement};

/// In-memory table: definition plus rows in insertion order.
#[derive(Debug, Clone)]
pub(super) struct MemTable {
    pub(super) def: TableDef,
    pub(super) rows: Vec<Row>,
    next_id: i64,
}

/// Whole in-memory database state. Cloned to snapshot a unit.
#[derive(Debug, Clone, Default)]
pub(crate) struct Database {
    pub(super) tables: BTreeMap<String, MemTable>,
}

pub(super) fn undefined_table(table: &str) -> StoreError {
    StoreError::new(
        StoreErrorKind::UndefinedTable,
        format!("relation \"{table}\" does not exist"),
    )
}

impl Database {
    /// Apply one statement. Mutations run on a scratch copy that replaces the
    /// current state only on success, so a failed statement changes nothing.
    pub(crate) fn apply(
        &mut self,
        statement: &Statement,
        native: bool,
    ) -> Result<QueryResult, StoreError> {
        match statement {
            Statement::Select {
                table,
                filter,
                order_by,
                limit,
                ..
            } => self.select(table, filter, order_by.as_deref(), *limit),
            Statement::Count { table, filter } => {
                let count = self.table(table)?.rows.iter().filter(|row| filter.matches(row)).count();
                let mut row = Row::new();
                row.insert("count".to_string(), Value::Integer(count as i64));
                Ok(QueryResult::with_rows(vec![row]))
            }
            _ => {
                let mut scratch = self.clone();
                let result = scratch.mutate(statement, native)?;
                *self = scratch;
                Ok(result)
            }
        }
    }

    pub(crate) fn describe(&self, table: &str) -> Option<TableDef> {
        self.tables.get(table).map(|mem| {
            let mut def = mem.def.clone();
            def.foreign_keys.sort_by(|left, right| left.name.cmp(&right.name));
            def
        })
    }

    pub(crate) fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|mem| mem.rows.clone())
            .unwrap_or_default()
    }

    pub(super) fn table(&self, table: &str) -> Result<&MemTable, StoreError> {
        self.tables.get(table).ok_or_else(|| undefined_table(table))
    }

    pub(super) fn table_mut(&mut self, table: &str) -> Result<&mut MemTable, StoreError> {
        self.tables.get_mut(table).ok_or_else(|| undefined_table(table))
    }

    /// Foreign keys anywhere in the database that reference `table`.
    pub(super) fn referencing(&self, table: &str) -> Vec<(String, ForeignKeyDef)> {
        self.tables
            .values()
            .flat_map(|mem| {
                mem.def
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.referenced_table == table)
                    .map(|fk| (mem.def.name.clone(), fk.clone()))
            })
            .collect()
    }

    fn mutate(&mut self, statement: &Statement, native: bool) -> Result<QueryResult, StoreError> {
        match statement {
            Statement::CreateTable {
                table,
                if_not_exists,
            } => {
                self.create_table(table, *if_not_exists, native)?;
                Ok(QueryResult::default())
            }
            Statement::DropTable {
                table,
                if_exists,
                cascade,
            } => {
                self.drop_table(table, *if_exists, *cascade)?;
                Ok(QueryResult::default())
            }
            Statement::AddForeignKey { table, foreign_key } => {
                self.add_foreign_key(table, foreign_key, native)?;
                Ok(QueryResult::default())
            }
            Statement::Insert { table, values } => self.insert(table, values),
            Statement::Update {
                table,
                assignments,
                filter,
            } => self.update(table, assignments, filter),
            Statement::Delete { table, filter } => self.delete(table, filter),
            Statement::Select { .. } | Statement::Count { .. } => Err(StoreError::internal(
                "read statements are not mutations",
            )),
        }
    }

    fn create_table(
        &mut self,
        table: &TableDef,
        if_not_exists: bool,
        native: bool,
    ) -> Result<(), StoreError> {
        if self.tables.contains_key(&table.name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(StoreError::new(
                StoreErrorKind::DuplicateTable,
                format!("relation \"{}\" already exists", table.name),
            ));
        }
        if !table.foreign_keys.is_empty() && !native {
            return Err(StoreError::unsupported(
                "foreign key constraints are not supported by this store",
            ));
        }
        for fk in &table.foreign_keys {
            if fk.referenced_table != table.name && !self.tables.contains_key(&fk.referenced_table)
            {
                return Err(undefined_table(&fk.referenced_table));
            }
        }

        self.tables.insert(
            table.name.clone(),
            MemTable {
                def: table.clone(),
                rows: Vec::new(),
                next_id: 1,
            },
        );
        Ok(())
    }

    fn drop_table(&mut self, table: &str, if_exists: bool, cascade: bool) -> Result<(), StoreError> {
        if !self.tables.contains_key(table) {
            if if_exists {
                return Ok(());
            }
            return Err(undefined_table(table));
        }

        let dependents: Vec<(String, ForeignKeyDef)> = self
            .referencing(table)
            .into_iter()
            .filter(|(owner, _)| owner != table)
            .collect();
        if !dependents.is_empty() && !cascade {
            return Err(StoreError::new(
                StoreErrorKind::DependentObjects,
                format!(
                    "cannot drop table \"{table}\" because other objects depend on it (constraint \"{}\")",
                    dependents[0].1.name
                ),
            ));
        }
        for (owner, fk) in dependents {
            if let Some(mem) = self.tables.get_mut(&owner) {
                mem.def.foreign_keys.retain(|existing| existing.name != fk.name);
            }
        }

        self.tables.remove(table);
        Ok(())
    }

    fn add_foreign_key(
        &mut self,
        table: &str,
        foreign_key: &ForeignKeyDef,
        native: bool,
    ) -> Result<(), StoreError> {
        if !native {
            return Err(StoreError::unsupported(
                "foreign key constraints are not supported by this store",
            ));
        }
        self.table(&foreign_key.referenced_table)?;
        let mem = self.table(table)?;
        if mem.def.column(&foreign_key.column).is_none() {
            return Err(StoreError::internal(format!(
                "column \"{}\" referenced in foreign key constraint does not exist",
                foreign_key.column
            )));
        }
        if mem.def.foreign_key(&foreign_key.name).is_some() {
            return Err(StoreError::internal(format!(
                "constraint \"{}\" for relation \"{table}\" already exists",
                foreign_key.name
            )));
        }

        self.table_mut(table)?
            .def
            .foreign_keys
            .push(foreign_key.clone());
        let rows = self.table(table)?.rows.clone();
        for row in &rows {
            self.check_reference(table, foreign_key, row)?;
        }
        Ok(())
    }

    fn insert(&mut self, table: &str, values: &[(String, Value)]) -> Result<QueryResult, StoreError> {
        let mem = self.table_mut(table)?;
        let mut row: Row = mem
            .def
            .columns
            .iter()
            .map(|column| (column.name.clone(), Value::Null))
            .collect();
        for (column, value) in values {
            let def = column_def(&mem.def, column)?;
            row.insert(column.clone(), coerce(def.data_type, value));
        }

        if let Some(pk) = mem.def.columns.iter().find(|column| column.auto_increment) {
            match row.get(&pk.name).and_then(Value::as_i64) {
                Some(explicit) => mem.next_id = mem.next_id.max(explicit + 1),
                None => {
                    row.insert(pk.name.clone(), Value::Integer(mem.next_id));
                    mem.next_id += 1;
                }
            }
        }

        check_not_null(&mem.def, &row)?;
        check_unique(mem, &row, None)?;
        mem.rows.push(row.clone());

        self.check_references(table, &row, None)?;
        Ok(QueryResult::with_rows(vec![row]))
    }

    fn update(
        &mut self,
        table: &str,
        assignments: &[(String, Value)],
        filter: &Filter,
    ) -> Result<QueryResult, StoreError> {
        let mem = self.table_mut(table)?;
        let mut changed = Vec::new();
        for index in 0..mem.rows.len() {
            if !filter.matches(&mem.rows[index]) {
                continue;
            }
            let old = mem.rows[index].clone();
            let mut new = old.clone();
            for (column, value) in assignments {
                let def = column_def(&mem.def, column)?;
                new.insert(column.clone(), coerce(def.data_type, value));
            }
            check_not_null(&mem.def, &new)?;
            check_unique(mem, &new, Some(index))?;
            if let Some(pk) = mem.def.columns.iter().find(|column| column.auto_increment) {
                if let Some(id) = new.get(&pk.name).and_then(Value::as_i64) {
                    mem.next_id = mem.next_id.max(id + 1);
                }
            }
            mem.rows[index] = new.clone();
            changed.push((old, new));
        }

        for (old, new) in &changed {
            self.propagate_key_update(table, old, new)?;
            self.check_references(table, new, Some(old))?;
        }
        Ok(QueryResult::affected(changed.len() as u64))
    }

    fn delete(&mut self, table: &str, filter: &Filter) -> Result<QueryResult, StoreError> {
        let targets: Vec<Row> = self
            .table(table)?
            .rows
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        let count = targets.len() as u64;
        self.delete_rows(table, targets)?;
        Ok(QueryResult::affected(count))
    }

    fn select(
        &self,
        table: &str,
        filter: &Filter,
        order_by: Option<&str>,
        limit: Option<u64>,
    ) -> Result<QueryResult, StoreError> {
        let mut rows: Vec<Row> = self
            .table(table)?
            .rows
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        if let Some(column) = order_by {
            rows.sort_by(|left, right| {
                compare_values(
                    left.get(column).unwrap_or(&Value::Null),
                    right.get(column).unwrap_or(&Value::Null),
                )
            });
        }
        if let Some(limit) = limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        Ok(QueryResult::with_rows(rows))
    }
}

fn column_def<'a>(def: &'a TableDef, column: &str) -> Result<&'a ColumnDef, StoreError> {
    def.column(column).ok_or_else(|| {
        StoreError::internal(format!(
            "column \"{column}\" of relation \"{}\" does not exist",
            def.name
        ))
    })
}

fn coerce(data_type: DataType, value: &Value) -> Value {
    match (data_type, value) {
        (DataType::Float, Value::Integer(number)) => Value::Float(*number as f64),
        _ => value.clone(),
    }
}

fn check_not_null(def: &TableDef, row: &Row) -> Result<(), StoreError> {
    for column in &def.columns {
        let nullable = column.nullable && !column.primary_key;
        if !nullable && row.get(&column.name).is_none_or(Value::is_null) {
            return Err(StoreError::new(
                StoreErrorKind::NotNullViolation,
                format!(
                    "null value in column \"{}\" of relation \"{}\" violates not-null constraint",
                    column.name, def.name
                ),
            ));
        }
    }
    Ok(())
}

fn check_unique(mem: &MemTable, row: &Row, skip: Option<usize>) -> Result<(), StoreError> {
    for column in mem
        .def
        .columns
        .iter()
        .filter(|column| column.primary_key || column.unique)
    {
        let Some(value) = row.get(&column.name).filter(|value| !value.is_null()) else {
            continue;
        };
        let clash = mem.rows.iter().enumerate().any(|(index, existing)| {
            Some(index) != skip
                && existing
                    .get(&column.name)
                    .is_some_and(|other| other.sql_eq(value))
        });
        if clash {
            let constraint = if column.primary_key {
                format!("{}_pkey", mem.def.name)
            } else {
                format!("{}_{}_key", mem.def.name, column.name)
            };
            return Err(StoreError::new(
                StoreErrorKind::UniqueViolation,
                format!("duplicate key value violates unique constraint \"{constraint}\""),
            ));
        }
    }
    Ok(())
}

/// Total order used for `ORDER BY`: nulls first, then by value.
fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
        (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => left.type_name().cmp(right.type_name()),
    }
}
