//! Schema synchronization from declared entity types and associations.
//!
//! Constraints whose referenced table does not exist yet are deferred and
//! attached with `ALTER TABLE … ADD CONSTRAINT` once that table is
//! synchronized. Forcing a table drops it with its dependent constraints and
//! re-queues those constraints, so repeated forced syncs converge on the same
//! physical schema.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use cascadia_core::{
    DependencyEdges, Error, ForeignKeyDef, Registry, Result, build_dependency_report,
};
use cascadia_store::{Statement, Store};

use crate::generator::{StatementGenerator, Strategy};

/// Options recognised by `sync`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Drop the table (and constraints that reference it) before creating it.
    pub force: bool,
}

impl SyncOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

/// Outcome of synchronizing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub table: String,
    pub dropped: bool,
    pub created: bool,
    /// Constraints of this table waiting for their referenced table.
    pub deferred_constraints: Vec<String>,
    /// Constraints attached by `ALTER TABLE` during this sync, on any table.
    pub attached_constraints: Vec<String>,
}

/// Sync bookkeeping kept by a session between calls.
#[derive(Debug, Default)]
pub struct SyncState {
    synced: BTreeSet<String>,
    /// Deferred constraints keyed by the table they reference.
    pending: BTreeMap<String, Vec<(String, ForeignKeyDef)>>,
}

impl SyncState {
    pub fn is_synced(&self, table: &str) -> bool {
        self.synced.contains(table)
    }

    pub fn pending_constraints(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn queue(&mut self, owner: &str, fk: ForeignKeyDef) {
        let queue = self.pending.entry(fk.referenced_table.clone()).or_default();
        if !queue.iter().any(|(_, existing)| existing.name == fk.name) {
            queue.push((owner.to_string(), fk));
        }
    }

    fn forget_owner(&mut self, owner: &str) {
        for queue in self.pending.values_mut() {
            queue.retain(|(table, _)| table != owner);
        }
        self.pending.retain(|_, queue| !queue.is_empty());
    }
}

/// Creates, drops and wires up physical tables for a registry.
pub struct SchemaSynchronizer<'a> {
    store: &'a dyn Store,
    registry: &'a Registry,
    generator: StatementGenerator,
    state: &'a mut SyncState,
}

impl<'a> SchemaSynchronizer<'a> {
    pub fn new(
        store: &'a dyn Store,
        registry: &'a Registry,
        generator: StatementGenerator,
        state: &'a mut SyncState,
    ) -> Self {
        Self {
            store,
            registry,
            generator,
            state,
        }
    }

    /// Create (or, with `force`, re-create) the table of `entity`.
    pub async fn sync(&mut self, entity: &str, options: SyncOptions) -> Result<SyncReport> {
        let table = self.generator.table_definition(self.registry, entity)?;
        let mut report = SyncReport {
            table: table.name.clone(),
            ..SyncReport::default()
        };

        let mut existing = self.store.describe(&table.name).await?;
        if options.force && existing.is_some() {
            self.requeue_dependents(&table.name).await?;
            self.store
                .execute(&self.generator.drop_table(&table.name))
                .await?;
            report.dropped = true;
            existing = None;
        }
        if options.force {
            self.state.synced.remove(&table.name);
            self.state.forget_owner(&table.name);
        }

        let mut ready = Vec::new();
        let mut deferred = Vec::new();
        for fk in &table.foreign_keys {
            if let Some(current) = &existing {
                if current.foreign_key(&fk.name).is_some() {
                    continue;
                }
            }
            if fk.referenced_table == table.name || self.table_exists(&fk.referenced_table).await? {
                ready.push(fk.clone());
            } else {
                deferred.push(fk.clone());
            }
        }

        let late_attach = existing.is_some() && !ready.is_empty();
        if (!deferred.is_empty() || late_attach)
            && !self.store.capabilities().deferred_constraints
        {
            let names: Vec<&str> = deferred.iter().chain(&ready).map(|fk| fk.name.as_str()).collect();
            return Err(Error::Schema(format!(
                "table '{}' needs constraints attached after creation ({}) but store '{}' cannot defer constraints",
                table.name,
                names.join(", "),
                self.store.engine()
            )));
        }

        if existing.is_none() {
            let mut create = table.without_foreign_keys();
            create.foreign_keys = ready;
            self.store
                .execute(&self.generator.create_table(create))
                .await?;
            report.created = true;
        } else {
            for fk in ready {
                let name = fk.name.clone();
                self.store
                    .execute(&self.generator.add_foreign_key(&table.name, fk))
                    .await?;
                report.attached_constraints.push(name);
            }
        }

        for fk in deferred {
            report.deferred_constraints.push(fk.name.clone());
            self.state.queue(&table.name, fk);
        }
        self.state.synced.insert(table.name.clone());

        let attached = self.attach_pending(&table.name).await?;
        report.attached_constraints.extend(attached);

        tracing::info!(
            event = "sync_table",
            table = %report.table,
            dropped = report.dropped,
            created = report.created,
            deferred = report.deferred_constraints.len(),
            attached = report.attached_constraints.len(),
        );
        Ok(report)
    }

    /// Synchronize every entity type, parents first.
    pub async fn sync_all(&mut self, options: SyncOptions) -> Result<Vec<SyncReport>> {
        let order = sync_order(self.registry, self.generator, self.store.capabilities().deferred_constraints)?;
        let mut reports = Vec::with_capacity(order.len());
        for entity in order {
            reports.push(self.sync(&entity, options).await?);
        }
        Ok(reports)
    }

    /// Drop every table, children first.
    pub async fn drop_all(&mut self) -> Result<()> {
        let order = sync_order(self.registry, self.generator, true)?;
        for entity in order.iter().rev() {
            self.store.execute(&self.generator.drop_table(entity)).await?;
            tracing::info!(event = "drop_table", table = %entity);
        }
        self.state.synced.clear();
        self.state.pending.clear();
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.store.describe(table).await?.is_some())
    }

    /// Queue the live constraints of other tables that reference `table`,
    /// since dropping it removes them.
    async fn requeue_dependents(&mut self, table: &str) -> Result<()> {
        for entity in self.registry.entity_types() {
            if entity.name == table {
                continue;
            }
            let Some(current) = self.store.describe(&entity.name).await? else {
                continue;
            };
            for fk in current.foreign_keys {
                if fk.referenced_table == table {
                    self.state.queue(&entity.name, fk);
                }
            }
        }
        Ok(())
    }

    /// Attach deferred constraints that reference `table`.
    async fn attach_pending(&mut self, table: &str) -> Result<Vec<String>> {
        let Some(queue) = self.state.pending.remove(table) else {
            return Ok(Vec::new());
        };

        let mut attached = Vec::new();
        for (owner, fk) in queue {
            let Some(current) = self.store.describe(&owner).await? else {
                continue;
            };
            if current.foreign_key(&fk.name).is_some() {
                continue;
            }
            let name = fk.name.clone();
            self.store
                .execute(&self.generator.add_foreign_key(&owner, fk))
                .await?;
            tracing::info!(event = "attach_constraint", table = %owner, constraint = %name);
            attached.push(name);
        }
        Ok(attached)
    }
}

/// Order in which tables are created.
///
/// Native sessions order by constrained associations; a cycle is only
/// accepted when constraints can be deferred. Emulated sessions create no
/// constraints, so any cycle falls back to declaration order.
fn sync_order(
    registry: &Registry,
    generator: StatementGenerator,
    deferred_constraints: bool,
) -> Result<Vec<String>> {
    let edges = match generator.strategy() {
        Strategy::Native => DependencyEdges::Constrained,
        Strategy::Emulated => DependencyEdges::All,
    };
    let report = build_dependency_report(registry, edges);
    match report.topo_order {
        Some(order) => Ok(order),
        None if generator.strategy() == Strategy::Native && !deferred_constraints => {
            Err(Error::Schema(format!(
                "cyclic constraints between {}",
                report.cycle.unwrap_or_default().join(", ")
            )))
        }
        None => Ok(registry
            .entity_types()
            .map(|entity| entity.name.clone())
            .collect()),
    }
}

/// DDL that creates the whole schema from scratch, in execution order,
/// without touching a store.
pub fn plan_schema(registry: &Registry, generator: StatementGenerator) -> Result<Vec<Statement>> {
    let order = sync_order(registry, generator, true)?;
    let mut created: BTreeSet<String> = BTreeSet::new();
    let mut pending: BTreeMap<String, Vec<(String, ForeignKeyDef)>> = BTreeMap::new();
    let mut statements = Vec::new();

    for entity in order {
        let table = generator.table_definition(registry, &entity)?;
        let mut create = table.without_foreign_keys();
        for fk in table.foreign_keys {
            if fk.referenced_table == table.name || created.contains(&fk.referenced_table) {
                create.foreign_keys.push(fk);
            } else {
                pending
                    .entry(fk.referenced_table.clone())
                    .or_default()
                    .push((table.name.clone(), fk));
            }
        }
        statements.push(generator.create_table(create));
        created.insert(table.name.clone());

        for (owner, fk) in pending.remove(&table.name).unwrap_or_default() {
            statements.push(generator.add_foreign_key(&owner, fk));
        }
    }

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascadia_core::{AssociationOptions, Attribute, Cardinality, ReferentialAction};

    fn cyclic_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .define_entity_type("Team", vec![Attribute::string("name")])
            .unwrap();
        registry
            .define_entity_type("User", vec![Attribute::string("username")])
            .unwrap();
        let cascade = AssociationOptions::default().on_delete(ReferentialAction::Cascade);
        registry
            .declare_association("Team", "User", Cardinality::OneToMany, cascade.clone())
            .unwrap();
        registry
            .declare_association(
                "User",
                "Team",
                Cardinality::OneToOne,
                cascade.foreign_key("OwnerId"),
            )
            .unwrap();
        registry
    }

    #[test]
    fn plan_defers_cyclic_constraint() {
        let registry = cyclic_registry();
        let statements = plan_schema(&registry, StatementGenerator::new(Strategy::Native)).unwrap();

        let kinds: Vec<(&str, &str)> = statements
            .iter()
            .map(|statement| (statement.kind(), statement.table()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("create_table", "Team"),
                ("create_table", "User"),
                ("add_foreign_key", "Team"),
            ]
        );
    }

    #[test]
    fn emulated_plan_has_no_constraints() {
        let registry = cyclic_registry();
        let statements =
            plan_schema(&registry, StatementGenerator::new(Strategy::Emulated)).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|statement| match statement {
            Statement::CreateTable { table, .. } => table.foreign_keys.is_empty(),
            _ => false,
        }));
    }

    #[test]
    fn cycle_without_deferral_is_a_schema_error() {
        let registry = cyclic_registry();
        let err = sync_order(&registry, StatementGenerator::new(Strategy::Native), false)
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
