//! Store-side enforcement of foreign-key constraints for the in-memory store.
//!
//! Mirrors PostgreSQL: a referential check failing anywhere in a statement
//! aborts the whole statement, and `NO ACTION` on a physical constraint blocks
//! like `RESTRICT`.

use std::collections::{BTreeSet, VecDeque};

use cascadia_core::{ForeignKeyDef, ReferentialAction, Row, StoreError, StoreErrorKind, Value};

use super::database::Database;

fn parent_violation(parent: &str, child: &str, fk: &ForeignKeyDef) -> StoreError {
    StoreError::new(
        StoreErrorKind::ForeignKeyViolation,
        format!(
            "update or delete on table \"{parent}\" violates foreign key constraint \"{}\" on table \"{child}\"",
            fk.name
        ),
    )
}

fn child_violation(child: &str, fk: &ForeignKeyDef) -> StoreError {
    StoreError::new(
        StoreErrorKind::ForeignKeyViolation,
        format!(
            "insert or update on table \"{child}\" violates foreign key constraint \"{}\"",
            fk.name
        ),
    )
}

fn row_id(row: &Row) -> Option<i64> {
    row.get(cascadia_core::IDENTITY_COLUMN).and_then(Value::as_i64)
}

impl Database {
    /// Delete `targets` from `table` and apply every `ON DELETE` action they
    /// trigger, transitively.
    pub(super) fn delete_rows(&mut self, table: &str, targets: Vec<Row>) -> Result<(), StoreError> {
        let mut deleted: BTreeSet<(String, i64)> = BTreeSet::new();
        let mut worklist: VecDeque<(String, Row)> = VecDeque::new();
        for row in targets {
            if let Some(id) = row_id(&row) {
                deleted.insert((table.to_string(), id));
            }
            worklist.push_back((table.to_string(), row));
        }

        let mut blocked: Vec<(String, String, ForeignKeyDef, i64)> = Vec::new();
        let mut nullify: Vec<(String, String, i64)> = Vec::new();

        while let Some((parent_table, parent_row)) = worklist.pop_front() {
            for (child_table, fk) in self.referencing(&parent_table) {
                let Some(key) = parent_row
                    .get(&fk.referenced_column)
                    .filter(|value| !value.is_null())
                else {
                    continue;
                };
                let children: Vec<Row> = self
                    .table(&child_table)?
                    .rows
                    .iter()
                    .filter(|row| row.get(&fk.column).is_some_and(|value| value.sql_eq(key)))
                    .cloned()
                    .collect();

                for child in children {
                    let Some(child_id) = row_id(&child) else {
                        continue;
                    };
                    match fk.on_delete {
                        ReferentialAction::Cascade => {
                            if deleted.insert((child_table.clone(), child_id)) {
                                worklist.push_back((child_table.clone(), child));
                            }
                        }
                        ReferentialAction::SetNull => {
                            nullify.push((child_table.clone(), fk.column.clone(), child_id));
                        }
                        ReferentialAction::Restrict | ReferentialAction::NoAction => {
                            blocked.push((
                                parent_table.clone(),
                                child_table.clone(),
                                fk.clone(),
                                child_id,
                            ));
                        }
                    }
                }
            }
        }

        if let Some((parent, child, fk, _)) = blocked
            .iter()
            .find(|(_, child, _, id)| !deleted.contains(&(child.clone(), *id)))
        {
            return Err(parent_violation(parent, child, fk));
        }

        for (child_table, column, child_id) in nullify {
            if deleted.contains(&(child_table.clone(), child_id)) {
                continue;
            }
            let mem = self.table_mut(&child_table)?;
            if let Some(row) = mem.rows.iter_mut().find(|row| row_id(row) == Some(child_id)) {
                row.insert(column, Value::Null);
            }
        }

        for mem in self.tables.values_mut() {
            let name = mem.def.name.clone();
            mem.rows.retain(|row| {
                row_id(row).is_none_or(|id| !deleted.contains(&(name.clone(), id)))
            });
        }
        Ok(())
    }

    /// Apply `ON UPDATE` actions for a row whose referenced key changed.
    pub(super) fn propagate_key_update(
        &mut self,
        table: &str,
        old: &Row,
        new: &Row,
    ) -> Result<(), StoreError> {
        for (child_table, fk) in self.referencing(table) {
            let Some(old_key) = old
                .get(&fk.referenced_column)
                .filter(|value| !value.is_null())
            else {
                continue;
            };
            let new_key = new.get(&fk.referenced_column).cloned().unwrap_or(Value::Null);
            if old_key.sql_eq(&new_key) {
                continue;
            }

            let replacement = match fk.on_update {
                ReferentialAction::Cascade => new_key,
                ReferentialAction::SetNull => Value::Null,
                ReferentialAction::Restrict | ReferentialAction::NoAction => {
                    let referenced = self.table(&child_table)?.rows.iter().any(|row| {
                        row.get(&fk.column)
                            .is_some_and(|value| value.sql_eq(old_key))
                    });
                    if referenced {
                        return Err(parent_violation(table, &child_table, &fk));
                    }
                    continue;
                }
            };

            let mem = self.table_mut(&child_table)?;
            for row in mem.rows.iter_mut() {
                if row.get(&fk.column).is_some_and(|value| value.sql_eq(old_key)) {
                    row.insert(fk.column.clone(), replacement.clone());
                }
            }
        }
        Ok(())
    }

    /// Check the outgoing references of `row`. With `old`, only changed
    /// columns are checked.
    pub(super) fn check_references(
        &self,
        table: &str,
        row: &Row,
        old: Option<&Row>,
    ) -> Result<(), StoreError> {
        let foreign_keys = self.table(table)?.def.foreign_keys.clone();
        for fk in &foreign_keys {
            if let Some(old) = old {
                let before = old.get(&fk.column).unwrap_or(&Value::Null);
                let after = row.get(&fk.column).unwrap_or(&Value::Null);
                if before == after {
                    continue;
                }
            }
            self.check_reference(table, fk, row)?;
        }
        Ok(())
    }

    pub(super) fn check_reference(
        &self,
        table: &str,
        fk: &ForeignKeyDef,
        row: &Row,
    ) -> Result<(), StoreError> {
        let Some(value) = row.get(&fk.column).filter(|value| !value.is_null()) else {
            return Ok(());
        };
        let exists = self
            .table(&fk.referenced_table)?
            .rows
            .iter()
            .any(|parent| {
                parent
                    .get(&fk.referenced_column)
                    .is_some_and(|key| key.sql_eq(value))
            });
        if exists {
            Ok(())
        } else {
            Err(child_violation(table, fk))
        }
    }
}
