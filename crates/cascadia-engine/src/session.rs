//! Sessions and model handles.
//!
//! A [`Session`] binds a registry of entity types to one store. The strategy
//! for referential actions is fixed when the session opens. Every operation
//! takes a snapshot of the registry, so definitions added later never affect
//! an operation already in flight.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use cascadia_core::{
    Association, AssociationOptions, Attribute, Cardinality, EntityType, Error, ModelDefinition,
    Registry, Result, Row, StoreError, StoreErrorKind, Value,
};
use cascadia_store::{Statement, Store};

use crate::completion::Completion;
use crate::config::SessionConfig;
use crate::executor::{self, OperationContext};
use crate::generator::{StatementGenerator, Strategy};
use crate::record::{Criteria, Record};
use crate::sync::{self, SchemaSynchronizer, SyncOptions, SyncReport, SyncState};

pub(crate) struct SessionInner {
    id: Uuid,
    store: Arc<dyn Store>,
    config: SessionConfig,
    generator: StatementGenerator,
    registry: RwLock<Arc<Registry>>,
    sync_state: Mutex<SyncState>,
    closed: AtomicBool,
}

impl SessionInner {
    pub(crate) fn registry(&self) -> Arc<Registry> {
        let guard = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn update_registry<T>(&self, change: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        let mut guard = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Registry::clone(&guard);
        let value = change(&mut next)?;
        *guard = Arc::new(next);
        Ok(value)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::from(StoreError::new(
                StoreErrorKind::Closed,
                format!("session {} was torn down", self.id),
            )));
        }
        Ok(())
    }

    fn context(self: &Arc<Self>) -> Result<OperationContext> {
        self.ensure_open()?;
        Ok(OperationContext {
            store: Arc::clone(&self.store),
            registry: self.registry(),
            generator: self.generator,
            max_cascade_depth: self.config.max_cascade_depth,
            session: Arc::downgrade(self),
        })
    }

    /// Spawn `operation` with a fresh context, or resolve with the reason no
    /// context is available.
    pub(crate) fn run<T, F, Fut>(self: &Arc<Self>, operation: F) -> Completion<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(OperationContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.context() {
            Ok(ctx) => Completion::spawn(operation(ctx)),
            Err(err) => Completion::ready(Err(err)),
        }
    }

    pub(crate) fn set_associated_by(
        self: &Arc<Self>,
        assoc: Association,
        parent: &Record,
        children: &[Record],
    ) -> Completion<()> {
        match association_keys(&assoc, parent, children) {
            Ok((parent_id, child_ids)) => self.run(move |ctx| {
                executor::set_associated(ctx, assoc, parent_id, child_ids)
            }),
            Err(err) => Completion::ready(Err(err)),
        }
    }

    /// Registry snapshot and exclusive sync bookkeeping for one sync call.
    async fn sync_parts(&self) -> Result<(Arc<Registry>, MutexGuard<'_, SyncState>)> {
        self.ensure_open()?;
        let registry = self.registry();
        let state = self.sync_state.lock().await;
        Ok((registry, state))
    }

    fn synchronizer<'a>(
        &'a self,
        registry: &'a Registry,
        state: &'a mut SyncState,
    ) -> SchemaSynchronizer<'a> {
        SchemaSynchronizer::new(&*self.store, registry, self.generator, state)
    }
}

fn association_keys(
    assoc: &Association,
    parent: &Record,
    children: &[Record],
) -> Result<(i64, Vec<i64>)> {
    if parent.entity() != assoc.source {
        return Err(Error::Validation(format!(
            "{assoc} expects a {} parent, got {}",
            assoc.source,
            parent.entity()
        )));
    }
    let parent_id = parent
        .id()
        .ok_or_else(|| Error::Validation(format!("{} record has no id", parent.entity())))?;

    let mut child_ids = Vec::with_capacity(children.len());
    for child in children {
        if child.entity() != assoc.target {
            return Err(Error::Validation(format!(
                "{assoc} expects {} children, got {}",
                assoc.target,
                child.entity()
            )));
        }
        let id = child
            .id()
            .ok_or_else(|| Error::Validation(format!("{} record has no id", child.entity())))?;
        child_ids.push(id);
    }
    Ok((parent_id, child_ids))
}

/// A registry of entity types bound to one store.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("engine", &self.inner.store.engine())
            .field("strategy", &self.inner.generator.strategy())
            .finish()
    }
}

impl Session {
    /// Open a session on `store`, resolving the enforcement strategy from
    /// `config` and the store's capabilities.
    pub fn new(store: Arc<dyn Store>, config: SessionConfig) -> Result<Self> {
        let capabilities = store.capabilities();
        let strategy = Strategy::select(config.strategy, store.engine(), &capabilities)?;
        if config.max_cascade_depth == 0 {
            return Err(Error::Configuration(
                "max_cascade_depth must be at least 1".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        if strategy == Strategy::Emulated && !capabilities.transactions {
            tracing::warn!(
                event = "emulation_without_transactions",
                session = %id,
                engine = store.engine(),
                "referential actions are emulated statement by statement; concurrent writers can observe partial cascades",
            );
        }
        tracing::info!(
            event = "session_open",
            session = %id,
            engine = store.engine(),
            strategy = ?strategy,
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                store,
                config,
                generator: StatementGenerator::new(strategy),
                registry: RwLock::new(Arc::new(Registry::new())),
                sync_state: Mutex::new(SyncState::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open a session whose registry comes from a model definition document.
    pub fn from_definition(
        store: Arc<dyn Store>,
        config: SessionConfig,
        definition: &ModelDefinition,
    ) -> Result<Self> {
        let registry = definition.into_registry()?;
        let session = Self::new(store, config)?;
        session.inner.update_registry(|current| {
            *current = registry;
            Ok(())
        })?;
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.generator.strategy()
    }

    pub fn generator(&self) -> StatementGenerator {
        self.inner.generator
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Snapshot of the current registry.
    pub fn registry(&self) -> Arc<Registry> {
        self.inner.registry()
    }

    pub fn define(&self, name: &str, attributes: Vec<Attribute>) -> Result<Model> {
        self.inner
            .update_registry(|registry| registry.define_entity_type(name, attributes))?;
        Ok(self.handle(name))
    }

    /// Handle for an entity type that is already defined.
    pub fn model(&self, name: &str) -> Result<Model> {
        self.registry().require_entity(name)?;
        Ok(self.handle(name))
    }

    fn handle(&self, name: &str) -> Model {
        Model {
            session: self.clone(),
            name: name.to_string(),
        }
    }

    pub fn declare_association(
        &self,
        source: &str,
        target: &str,
        cardinality: Cardinality,
        options: AssociationOptions,
    ) -> Result<Association> {
        self.inner.update_registry(|registry| {
            registry.declare_association(source, target, cardinality, options)
        })
    }

    /// DDL for the whole registry, in execution order.
    pub fn plan_schema(&self) -> Result<Vec<Statement>> {
        sync::plan_schema(&self.registry(), self.inner.generator)
    }

    pub async fn sync_all(&self, options: SyncOptions) -> Result<Vec<SyncReport>> {
        let (registry, mut state) = self.inner.sync_parts().await?;
        self.inner
            .synchronizer(&registry, &mut state)
            .sync_all(options)
            .await
    }

    pub async fn drop_all(&self) -> Result<()> {
        let (registry, mut state) = self.inner.sync_parts().await?;
        self.inner
            .synchronizer(&registry, &mut state)
            .drop_all()
            .await
    }

    /// Replace the dependents of `parent` through `assoc` with `children`.
    pub fn set_associated(
        &self,
        assoc: &Association,
        parent: &Record,
        children: &[Record],
    ) -> Completion<()> {
        self.inner
            .set_associated_by(assoc.clone(), parent, children)
    }

    pub fn get_associated(&self, assoc: &Association, parent: &Record) -> Completion<Vec<Record>> {
        let assoc = assoc.clone();
        let Some(parent_id) = parent.id() else {
            return Completion::ready(Err(Error::Validation(format!(
                "{} record has no id",
                parent.entity()
            ))));
        };
        self.inner
            .run(move |ctx| executor::get_associated(ctx, assoc, parent_id))
    }

    /// Drop every table of the registry and close the session. Records and
    /// models still held by callers fail with a closed-store error.
    pub async fn teardown(self) -> Result<()> {
        let dropped = self.drop_all().await;
        self.close();
        dropped
    }

    /// Close the session without touching the store.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(event = "session_close", session = %self.inner.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Handle for one entity type of a session.
#[derive(Debug, Clone)]
pub struct Model {
    session: Session,
    name: String,
}

impl Model {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn entity_type(&self) -> Result<EntityType> {
        self.session.registry().require_entity(&self.name).cloned()
    }

    /// Declare a one-to-many association; the foreign key lives on `target`.
    pub fn has_many(&self, target: &Model, options: AssociationOptions) -> Result<Association> {
        self.session
            .declare_association(&self.name, &target.name, Cardinality::OneToMany, options)
    }

    pub fn has_one(&self, target: &Model, options: AssociationOptions) -> Result<Association> {
        self.session
            .declare_association(&self.name, &target.name, Cardinality::OneToOne, options)
    }

    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        let inner = &self.session.inner;
        let (registry, mut state) = inner.sync_parts().await?;
        inner
            .synchronizer(&registry, &mut state)
            .sync(&self.name, options)
            .await
    }

    pub fn create<I, K, V>(&self, values: I) -> Completion<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let row: Row = values
            .into_iter()
            .map(|(column, value)| (column.into(), value.into()))
            .collect();
        let entity = self.name.clone();
        self.session
            .inner
            .run(move |ctx| executor::create(ctx, entity, row))
    }

    pub fn find_all(&self, criteria: Criteria) -> Completion<Vec<Record>> {
        let entity = self.name.clone();
        let criteria = criteria.into_row();
        self.session
            .inner
            .run(move |ctx| executor::find_all(ctx, entity, criteria))
    }

    pub fn all(&self) -> Completion<Vec<Record>> {
        self.find_all(Criteria::new())
    }

    pub fn find_by_id(&self, id: i64) -> Completion<Option<Record>> {
        let entity = self.name.clone();
        self.session
            .inner
            .run(move |ctx| executor::find_by_id(ctx, entity, id))
    }

    pub fn count(&self, criteria: Criteria) -> Completion<u64> {
        let entity = self.name.clone();
        let criteria = criteria.into_row();
        self.session
            .inner
            .run(move |ctx| executor::count(ctx, entity, criteria))
    }
}
