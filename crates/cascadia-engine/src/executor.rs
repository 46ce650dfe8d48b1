//! Operation bodies. Each mutation runs in one atomic unit together with the
//! referential steps the session's strategy requires.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Weak};

use cascadia_core::{
    Association, Cardinality, ConstraintViolation, Error, IDENTITY_COLUMN, Registry, Result, Row,
    StoreError, Value, ViolationOperation, validate_changes, validate_criteria, validate_values,
};
use cascadia_store::{AtomicUnit, QueryResult, Store};

use crate::generator::{ReferentialStep, StatementGenerator, Strategy};
use crate::record::Record;
use crate::session::SessionInner;

/// Everything an operation needs, detached from the session so it can run on
/// its own task.
#[derive(Clone)]
pub(crate) struct OperationContext {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) generator: StatementGenerator,
    pub(crate) max_cascade_depth: usize,
    pub(crate) session: Weak<SessionInner>,
}

impl OperationContext {
    fn record(&self, entity: &str, row: Row) -> Record {
        Record::new(entity.to_string(), row, self.session.clone())
    }
}

fn row_id(row: &Row) -> Option<i64> {
    row.get(IDENTITY_COLUMN).and_then(Value::as_i64)
}

fn not_found(entity: &str, id: i64) -> Error {
    Error::NotFound {
        entity: entity.to_string(),
        id,
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    unit: Box<dyn AtomicUnit>,
    result: Result<T>,
    operation: &'static str,
    entity: &str,
) -> Result<T> {
    match result {
        Ok(value) => {
            unit.commit().await?;
            tracing::debug!(event = "commit", operation, entity);
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = unit.rollback().await {
                tracing::error!(
                    event = "rollback_failed",
                    operation,
                    entity,
                    error = %rollback_err,
                );
            }
            tracing::info!(event = "rollback", operation, entity, error = %err);
            Err(err)
        }
    }
}

pub(crate) async fn create(ctx: OperationContext, entity: String, values: Row) -> Result<Record> {
    let entity_type = ctx.registry.require_entity(&entity)?;
    let row = validate_values(&ctx.registry, entity_type, &values)?;

    let mut unit = ctx.store.begin().await?;
    let result = create_in(&ctx, unit.as_mut(), &entity, &row).await;
    let inserted = finish(unit, result, "create", &entity).await?;
    Ok(ctx.record(&entity, inserted))
}

async fn create_in(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    entity: &str,
    row: &Row,
) -> Result<Row> {
    check_references(ctx, unit, entity, row, None).await?;
    unit.execute(&ctx.generator.insert(entity, row))
        .await?
        .into_first()
        .ok_or_else(|| Error::from(StoreError::internal(format!("insert into {entity} returned no row"))))
}

pub(crate) async fn update(
    ctx: OperationContext,
    entity: String,
    id: i64,
    changes: Row,
) -> Result<Record> {
    let entity_type = ctx.registry.require_entity(&entity)?;
    validate_changes(&ctx.registry, entity_type, &changes)?;

    let mut unit = ctx.store.begin().await?;
    let result = update_in(&ctx, unit.as_mut(), &entity, id, &changes).await;
    let refreshed = finish(unit, result, "update", &entity).await?;
    Ok(ctx.record(&entity, refreshed))
}

async fn update_in(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    entity: &str,
    id: i64,
    changes: &Row,
) -> Result<Row> {
    let current = unit
        .execute(&ctx.generator.select_by_id(entity, id, true))
        .await?
        .into_first()
        .ok_or_else(|| not_found(entity, id))?;
    if changes.is_empty() {
        return Ok(current);
    }

    check_references(ctx, unit, entity, changes, Some(&current)).await?;

    let new_id = changes
        .get(IDENTITY_COLUMN)
        .and_then(Value::as_i64)
        .filter(|new_id| *new_id != id);
    match new_id {
        Some(new_id) if ctx.generator.strategy() == Strategy::Emulated => {
            rekey(ctx, unit, entity, id, new_id, changes).await?;
        }
        _ => {
            unit.execute(&ctx.generator.update_by_id(entity, id, changes))
                .await?;
        }
    }

    let key = new_id.unwrap_or(id);
    unit.execute(&ctx.generator.select_by_id(entity, key, false))
        .await?
        .into_first()
        .ok_or_else(|| not_found(entity, key))
}

/// Emulated identity change: guards, then the parent, then dependents.
async fn rekey(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    entity: &str,
    old: i64,
    new: i64,
    changes: &Row,
) -> Result<()> {
    let dependents: Vec<&Association> = ctx.registry.dependents_of(entity).collect();

    for assoc in &dependents {
        if ctx.generator.update_step(assoc) != ReferentialStep::Guard {
            continue;
        }
        let count = unit
            .execute(&ctx.generator.count_dependents(assoc, old))
            .await?
            .count();
        if count > 0 {
            return Err(Error::ConstraintViolation(ConstraintViolation {
                constraint: assoc.constraint_name(),
                entity: entity.to_string(),
                referencing_entity: assoc.target.clone(),
                operation: ViolationOperation::Update,
                count,
            }));
        }
    }

    unit.execute(&ctx.generator.update_by_id(entity, old, changes))
        .await?;

    for assoc in &dependents {
        let replacement = match ctx.generator.update_step(assoc) {
            ReferentialStep::Cascade => Value::Integer(new),
            ReferentialStep::Nullify => Value::Null,
            _ => continue,
        };
        let result = unit
            .execute(&ctx.generator.rekey_dependents(assoc, old, replacement))
            .await?;
        tracing::debug!(
            event = "emulated_update",
            association = %assoc,
            rows = result.rows_affected,
        );
    }
    Ok(())
}

/// Reject writes of a constrained foreign key that point at a missing row.
/// With `previous`, unchanged columns are skipped.
async fn check_references(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    entity: &str,
    values: &Row,
    previous: Option<&Row>,
) -> Result<()> {
    for assoc in ctx.registry.foreign_keys_of(entity) {
        if !ctx.generator.checks_reference(assoc) {
            continue;
        }
        let Some(key) = values.get(&assoc.foreign_key).and_then(Value::as_i64) else {
            continue;
        };
        let unchanged = previous
            .and_then(|row| row.get(&assoc.foreign_key))
            .and_then(Value::as_i64)
            == Some(key);
        if unchanged {
            continue;
        }

        let parent = unit
            .execute(&ctx.generator.select_by_id(&assoc.source, key, true))
            .await?;
        if parent.rows.is_empty() {
            return Err(Error::ConstraintViolation(ConstraintViolation {
                constraint: assoc.constraint_name(),
                entity: assoc.source.clone(),
                referencing_entity: assoc.target.clone(),
                operation: ViolationOperation::Reference,
                count: 1,
            }));
        }
    }
    Ok(())
}

pub(crate) async fn destroy(ctx: OperationContext, entity: String, id: i64) -> Result<()> {
    ctx.registry.require_entity(&entity)?;

    let mut unit = ctx.store.begin().await?;
    let result = destroy_in(&ctx, unit.as_mut(), &entity, id).await;
    finish(unit, result, "destroy", &entity).await
}

async fn destroy_in(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    entity: &str,
    id: i64,
) -> Result<()> {
    let existing = unit
        .execute(&ctx.generator.select_by_id(entity, id, true))
        .await?;
    if existing.rows.is_empty() {
        return Ok(());
    }

    match ctx.generator.strategy() {
        Strategy::Native => {
            unit.execute(&ctx.generator.delete_by_id(entity, id)).await?;
        }
        Strategy::Emulated => {
            let plan = plan_delete(ctx, unit, entity, id).await?;
            apply_delete(ctx, unit, plan).await?;
        }
    }
    Ok(())
}

/// Rows an emulated delete touches. Built completely, and every guard
/// checked, before anything is mutated.
struct DeletePlan {
    /// Parent first, in discovery order.
    deletes: Vec<(String, i64)>,
    nullify: Vec<(Association, i64)>,
}

async fn plan_delete(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    entity: &str,
    id: i64,
) -> Result<DeletePlan> {
    let mut visited: BTreeSet<(String, i64)> = BTreeSet::new();
    visited.insert((entity.to_string(), id));
    let mut deletes = vec![(entity.to_string(), id)];
    let mut worklist = VecDeque::from([(entity.to_string(), id, 0_usize)]);
    let mut guards: Vec<(Association, String, Vec<i64>)> = Vec::new();
    let mut nullify = Vec::new();

    while let Some((table, key, depth)) = worklist.pop_front() {
        for assoc in ctx.registry.dependents_of(&table) {
            let step = ctx.generator.delete_step(assoc);
            if matches!(step, ReferentialStep::Skip | ReferentialStep::Delegate) {
                continue;
            }

            let children: Vec<i64> = unit
                .execute(&ctx.generator.select_dependents(assoc, key))
                .await?
                .rows
                .iter()
                .filter_map(row_id)
                .collect();
            if children.is_empty() {
                continue;
            }

            match step {
                ReferentialStep::Guard => guards.push((assoc.clone(), table.clone(), children)),
                ReferentialStep::Nullify => {
                    nullify.extend(children.into_iter().map(|child| (assoc.clone(), child)));
                }
                ReferentialStep::Cascade => {
                    if depth + 1 > ctx.max_cascade_depth {
                        return Err(Error::Schema(format!(
                            "cascade from {entity} {id} exceeds the maximum depth of {}",
                            ctx.max_cascade_depth
                        )));
                    }
                    for child in children {
                        if visited.insert((assoc.target.clone(), child)) {
                            deletes.push((assoc.target.clone(), child));
                            worklist.push_back((assoc.target.clone(), child, depth + 1));
                        }
                    }
                }
                ReferentialStep::Skip | ReferentialStep::Delegate => {}
            }
        }
    }

    for (assoc, parent, children) in &guards {
        let blocking = children
            .iter()
            .filter(|child| !visited.contains(&(assoc.target.clone(), **child)))
            .count() as u64;
        if blocking > 0 {
            return Err(Error::ConstraintViolation(ConstraintViolation {
                constraint: assoc.constraint_name(),
                entity: parent.clone(),
                referencing_entity: assoc.target.clone(),
                operation: ViolationOperation::Delete,
                count: blocking,
            }));
        }
    }

    nullify.retain(|(assoc, child): &(Association, i64)| {
        !visited.contains(&(assoc.target.clone(), *child))
    });
    Ok(DeletePlan { deletes, nullify })
}

async fn apply_delete(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    plan: DeletePlan,
) -> Result<()> {
    for (assoc, child) in &plan.nullify {
        unit.execute(&ctx.generator.assign_foreign_key(assoc, *child, Value::Null))
            .await?;
    }
    // Deepest rows first; the triggering row goes last.
    for (table, key) in plan.deletes.iter().rev() {
        unit.execute(&ctx.generator.delete_by_id(table, *key)).await?;
    }
    tracing::debug!(
        event = "emulated_delete",
        deleted = plan.deletes.len(),
        nullified = plan.nullify.len(),
    );
    Ok(())
}

pub(crate) async fn find_all(
    ctx: OperationContext,
    entity: String,
    criteria: Row,
) -> Result<Vec<Record>> {
    let entity_type = ctx.registry.require_entity(&entity)?;
    validate_criteria(&ctx.registry, entity_type, &criteria)?;
    let result = ctx
        .store
        .execute(&ctx.generator.select(&entity, &criteria))
        .await?;
    Ok(records(&ctx, &entity, result))
}

pub(crate) async fn find_by_id(
    ctx: OperationContext,
    entity: String,
    id: i64,
) -> Result<Option<Record>> {
    ctx.registry.require_entity(&entity)?;
    let result = ctx
        .store
        .execute(&ctx.generator.select_by_id(&entity, id, false))
        .await?;
    Ok(result.into_first().map(|row| ctx.record(&entity, row)))
}

pub(crate) async fn count(ctx: OperationContext, entity: String, criteria: Row) -> Result<u64> {
    let entity_type = ctx.registry.require_entity(&entity)?;
    validate_criteria(&ctx.registry, entity_type, &criteria)?;
    let result = ctx
        .store
        .execute(&ctx.generator.count(&entity, &criteria))
        .await?;
    Ok(result.count())
}

/// Replace the dependents of `parent` through `assoc` with `children`.
pub(crate) async fn set_associated(
    ctx: OperationContext,
    assoc: Association,
    parent: i64,
    children: Vec<i64>,
) -> Result<()> {
    if assoc.cardinality == Cardinality::OneToOne && children.len() > 1 {
        return Err(Error::Validation(format!(
            "{assoc} accepts at most one associated record, got {}",
            children.len()
        )));
    }

    let mut unit = ctx.store.begin().await?;
    let result = set_associated_in(&ctx, unit.as_mut(), &assoc, parent, &children).await;
    finish(unit, result, "set_associated", &assoc.source).await
}

async fn set_associated_in(
    ctx: &OperationContext,
    unit: &mut dyn AtomicUnit,
    assoc: &Association,
    parent: i64,
    children: &[i64],
) -> Result<()> {
    let found = unit
        .execute(&ctx.generator.select_by_id(&assoc.source, parent, true))
        .await?;
    if found.rows.is_empty() {
        return Err(not_found(&assoc.source, parent));
    }

    unit.execute(&ctx.generator.rekey_dependents(assoc, parent, Value::Null))
        .await?;
    for child in children {
        let result = unit
            .execute(&ctx.generator.assign_foreign_key(assoc, *child, Value::Integer(parent)))
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found(&assoc.target, *child));
        }
    }
    Ok(())
}

pub(crate) async fn get_associated(
    ctx: OperationContext,
    assoc: Association,
    parent: i64,
) -> Result<Vec<Record>> {
    let mut criteria = Row::new();
    criteria.insert(assoc.foreign_key.clone(), Value::Integer(parent));
    let result = ctx
        .store
        .execute(&ctx.generator.select(&assoc.target, &criteria))
        .await?;
    Ok(records(&ctx, &assoc.target, result))
}

fn records(ctx: &OperationContext, entity: &str, result: QueryResult) -> Vec<Record> {
    result
        .rows
        .into_iter()
        .map(|row| ctx.record(entity, row))
        .collect()
}
