use serde::{Deserialize, Serialize};

use cascadia_core::{
    Association, Cardinality, ColumnDef, DataType, Error, ForeignKeyDef, IDENTITY_COLUMN,
    ReferentialAction, Registry, Result, Row, TableDef, Value,
};
use cascadia_store::{Capabilities, Filter, Statement};

use crate::config::StrategyChoice;

/// How referential actions are enforced for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Constraint clauses in the DDL; the store applies the actions.
    Native,
    /// No constraint clauses; the engine issues the extra statements.
    Emulated,
}

impl Strategy {
    /// Resolve the configured choice against what the store supports.
    pub fn select(choice: StrategyChoice, engine: &str, capabilities: &Capabilities) -> Result<Self> {
        match choice {
            StrategyChoice::Auto if capabilities.native_foreign_key_actions => Ok(Strategy::Native),
            StrategyChoice::Auto | StrategyChoice::Emulated => Ok(Strategy::Emulated),
            StrategyChoice::Native if capabilities.native_foreign_key_actions => {
                Ok(Strategy::Native)
            }
            StrategyChoice::Native => Err(Error::Configuration(format!(
                "store '{engine}' does not enforce foreign key actions; use the emulated strategy"
            ))),
        }
    }
}

/// What the engine does for one association when its parent row is deleted
/// or re-keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialStep {
    /// The store enforces the action.
    Delegate,
    /// Unconstrained association: nothing is enforced.
    Skip,
    /// Abort when dependents exist.
    Guard,
    /// Delete or re-key dependents along with the parent.
    Cascade,
    /// Clear the dependents' foreign key.
    Nullify,
}

/// Builds DDL and CRUD statements for one strategy.
#[derive(Debug, Clone, Copy)]
pub struct StatementGenerator {
    strategy: Strategy,
}

impl StatementGenerator {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Physical table for `entity`: identity, attributes, then one foreign-key
    /// column per incoming association, in declaration order.
    pub fn table_definition(&self, registry: &Registry, entity: &str) -> Result<TableDef> {
        let entity_type = registry.require_entity(entity)?;
        let mut table = TableDef::new(entity_type.table_name());
        table.columns.push(ColumnDef::identity());

        for attribute in &entity_type.attributes {
            let mut column = ColumnDef::new(&attribute.name, attribute.data_type);
            column.nullable = attribute.allow_null;
            table.columns.push(column);
        }

        for assoc in registry.foreign_keys_of(entity) {
            let mut column = ColumnDef::new(&assoc.foreign_key, DataType::Integer);
            column.unique = assoc.cardinality == Cardinality::OneToOne;
            table.columns.push(column);
            if let Some(fk) = self.foreign_key_definition(assoc) {
                table.foreign_keys.push(fk);
            }
        }

        Ok(table)
    }

    /// Constraint clause for `assoc`, or `None` when nothing is emitted.
    pub fn foreign_key_definition(&self, assoc: &Association) -> Option<ForeignKeyDef> {
        if self.strategy != Strategy::Native || !assoc.is_constrained() {
            return None;
        }
        Some(ForeignKeyDef {
            name: assoc.constraint_name(),
            column: assoc.foreign_key.clone(),
            referenced_table: assoc.source.clone(),
            referenced_column: IDENTITY_COLUMN.to_string(),
            on_delete: assoc.on_delete,
            on_update: assoc.on_update,
        })
    }

    pub fn delete_step(&self, assoc: &Association) -> ReferentialStep {
        self.step(assoc, assoc.on_delete)
    }

    pub fn update_step(&self, assoc: &Association) -> ReferentialStep {
        self.step(assoc, assoc.on_update)
    }

    fn step(&self, assoc: &Association, action: ReferentialAction) -> ReferentialStep {
        if !assoc.is_constrained() {
            return ReferentialStep::Skip;
        }
        match (self.strategy, action) {
            (Strategy::Native, _) => ReferentialStep::Delegate,
            (Strategy::Emulated, ReferentialAction::Cascade) => ReferentialStep::Cascade,
            // A physical constraint blocks on its NO ACTION side too.
            (Strategy::Emulated, ReferentialAction::Restrict | ReferentialAction::NoAction) => {
                ReferentialStep::Guard
            }
            (Strategy::Emulated, ReferentialAction::SetNull) => ReferentialStep::Nullify,
        }
    }

    /// Whether writes to the association's foreign key must be checked by the
    /// engine.
    pub fn checks_reference(&self, assoc: &Association) -> bool {
        self.strategy == Strategy::Emulated && assoc.is_constrained()
    }

    pub fn create_table(&self, table: TableDef) -> Statement {
        Statement::CreateTable {
            table,
            if_not_exists: true,
        }
    }

    pub fn drop_table(&self, table: &str) -> Statement {
        Statement::DropTable {
            table: table.to_string(),
            if_exists: true,
            cascade: true,
        }
    }

    pub fn add_foreign_key(&self, table: &str, foreign_key: ForeignKeyDef) -> Statement {
        Statement::AddForeignKey {
            table: table.to_string(),
            foreign_key,
        }
    }

    pub fn insert(&self, entity: &str, row: &Row) -> Statement {
        Statement::Insert {
            table: entity.to_string(),
            values: row
                .iter()
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect(),
        }
    }

    pub fn select(&self, entity: &str, criteria: &Row) -> Statement {
        Statement::Select {
            table: entity.to_string(),
            filter: Filter::from_row(criteria),
            order_by: Some(IDENTITY_COLUMN.to_string()),
            limit: None,
            lock: false,
        }
    }

    pub fn select_by_id(&self, entity: &str, id: i64, lock: bool) -> Statement {
        Statement::Select {
            table: entity.to_string(),
            filter: Filter::by_id(id),
            order_by: None,
            limit: Some(1),
            lock,
        }
    }

    pub fn count(&self, entity: &str, criteria: &Row) -> Statement {
        Statement::Count {
            table: entity.to_string(),
            filter: Filter::from_row(criteria),
        }
    }

    pub fn update_by_id(&self, entity: &str, id: i64, changes: &Row) -> Statement {
        Statement::Update {
            table: entity.to_string(),
            assignments: changes
                .iter()
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect(),
            filter: Filter::by_id(id),
        }
    }

    pub fn delete_by_id(&self, entity: &str, id: i64) -> Statement {
        Statement::Delete {
            table: entity.to_string(),
            filter: Filter::by_id(id),
        }
    }

    /// Dependents of the parent row `key` through `assoc`, locked.
    pub fn select_dependents(&self, assoc: &Association, key: i64) -> Statement {
        Statement::Select {
            table: assoc.target.clone(),
            filter: Filter::new().eq(&assoc.foreign_key, key),
            order_by: Some(IDENTITY_COLUMN.to_string()),
            limit: None,
            lock: true,
        }
    }

    pub fn count_dependents(&self, assoc: &Association, key: i64) -> Statement {
        Statement::Count {
            table: assoc.target.clone(),
            filter: Filter::new().eq(&assoc.foreign_key, key),
        }
    }

    /// Point every dependent of `old` at `new` (or clear it with `Null`).
    pub fn rekey_dependents(&self, assoc: &Association, old: i64, new: Value) -> Statement {
        Statement::Update {
            table: assoc.target.clone(),
            assignments: vec![(assoc.foreign_key.clone(), new)],
            filter: Filter::new().eq(&assoc.foreign_key, old),
        }
    }

    /// Set the foreign key of one dependent row.
    pub fn assign_foreign_key(&self, assoc: &Association, child: i64, value: Value) -> Statement {
        Statement::Update {
            table: assoc.target.clone(),
            assignments: vec![(assoc.foreign_key.clone(), value)],
            filter: Filter::by_id(child),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascadia_core::{AssociationOptions, Attribute};

    fn registry(on_delete: ReferentialAction) -> Registry {
        let mut registry = Registry::new();
        registry
            .define_entity_type("User", vec![Attribute::string("username")])
            .unwrap();
        registry
            .define_entity_type("Task", vec![Attribute::string("title").not_null()])
            .unwrap();
        registry
            .declare_association(
                "User",
                "Task",
                Cardinality::OneToMany,
                AssociationOptions::default().on_delete(on_delete),
            )
            .unwrap();
        registry
    }

    fn capabilities(native: bool) -> Capabilities {
        Capabilities {
            native_foreign_key_actions: native,
            deferred_constraints: native,
            transactions: true,
        }
    }

    #[test]
    fn auto_follows_store_capabilities() {
        assert_eq!(
            Strategy::select(StrategyChoice::Auto, "memory", &capabilities(true)).unwrap(),
            Strategy::Native
        );
        assert_eq!(
            Strategy::select(StrategyChoice::Auto, "memory", &capabilities(false)).unwrap(),
            Strategy::Emulated
        );
        assert!(Strategy::select(StrategyChoice::Native, "memory", &capabilities(false)).is_err());
    }

    #[test]
    fn native_table_carries_constraint() {
        let registry = registry(ReferentialAction::Cascade);
        let table = StatementGenerator::new(Strategy::Native)
            .table_definition(&registry, "Task")
            .unwrap();

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "UserId"]);
        assert!(!table.column("title").unwrap().nullable);
        assert_eq!(table.foreign_keys.len(), 1);
        assert_eq!(table.foreign_keys[0].name, "Task_UserId_fkey");
        assert_eq!(table.foreign_keys[0].referenced_table, "User");
    }

    #[test]
    fn default_actions_emit_no_constraint() {
        let registry = registry(ReferentialAction::NoAction);
        let generator = StatementGenerator::new(Strategy::Native);
        let table = generator.table_definition(&registry, "Task").unwrap();
        assert!(table.column("UserId").is_some());
        assert!(table.foreign_keys.is_empty());
        assert_eq!(
            generator.delete_step(&registry.associations()[0]),
            ReferentialStep::Skip
        );
    }

    #[test]
    fn emulated_steps_follow_actions() {
        let generator = StatementGenerator::new(Strategy::Emulated);
        for (action, step) in [
            (ReferentialAction::Cascade, ReferentialStep::Cascade),
            (ReferentialAction::Restrict, ReferentialStep::Guard),
            (ReferentialAction::SetNull, ReferentialStep::Nullify),
            (ReferentialAction::NoAction, ReferentialStep::Skip),
        ] {
            let registry = registry(action);
            let assoc = &registry.associations()[0];
            assert_eq!(generator.delete_step(assoc), step);
            assert!(
                generator
                    .table_definition(&registry, "Task")
                    .unwrap()
                    .foreign_keys
                    .is_empty()
            );
        }
    }

    #[test]
    fn emulated_guards_default_side_of_constrained_association() {
        let registry = registry(ReferentialAction::Cascade);
        let generator = StatementGenerator::new(Strategy::Emulated);
        let assoc = &registry.associations()[0];
        assert_eq!(generator.delete_step(assoc), ReferentialStep::Cascade);
        assert_eq!(generator.update_step(assoc), ReferentialStep::Guard);
    }

    #[test]
    fn native_delegates_both_actions_of_constrained_association() {
        let registry = registry(ReferentialAction::Cascade);
        let generator = StatementGenerator::new(Strategy::Native);
        let assoc = &registry.associations()[0];
        assert_eq!(generator.delete_step(assoc), ReferentialStep::Delegate);
        assert_eq!(generator.update_step(assoc), ReferentialStep::Delegate);
        assert!(!generator.checks_reference(assoc));
    }
}
