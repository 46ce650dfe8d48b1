use std::fmt;
use std::sync::{Arc, Weak};

use cascadia_core::{Error, IDENTITY_COLUMN, Row, StoreError, StoreErrorKind, Value};

use crate::completion::Completion;
use crate::executor;
use crate::session::SessionInner;

/// Equality criteria for `find_all` and `count`. A `Null` value matches
/// rows where the column is null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    row: Row,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.row.insert(column.into(), value.into());
        self
    }

    pub fn as_row(&self) -> &Row {
        &self.row
    }

    pub fn into_row(self) -> Row {
        self.row
    }
}

impl From<Row> for Criteria {
    fn from(row: Row) -> Self {
        Self { row }
    }
}

/// One persisted row of an entity type.
///
/// `set` stages a change locally; `save` writes the staged changes. Records
/// hold a weak link to their session, so operations on a record whose
/// session was torn down fail with a closed-store error.
#[derive(Clone)]
pub struct Record {
    entity: String,
    values: Row,
    changes: Row,
    session: Weak<SessionInner>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.entity)
            .field("values", &self.values)
            .field("changes", &self.changes)
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.values == other.values && self.changes == other.changes
    }
}

impl Record {
    pub(crate) fn new(entity: String, values: Row, session: Weak<SessionInner>) -> Self {
        Self {
            entity,
            values,
            changes: Row::new(),
            session,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Identity of the row as last read from the store.
    pub fn id(&self) -> Option<i64> {
        self.values.get(IDENTITY_COLUMN).and_then(Value::as_i64)
    }

    /// Current value of `column`, staged changes first.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.changes
            .get(column)
            .or_else(|| self.values.get(column))
    }

    /// Values as last read from the store.
    pub fn values(&self) -> &Row {
        &self.values
    }

    pub fn is_dirty(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Stage a change; nothing is written until `save`.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.changes.insert(column.into(), value.into());
        self
    }

    /// Write staged changes. Resolves with the refreshed record.
    pub fn save(&self) -> Completion<Record> {
        self.update(self.changes.clone())
    }

    /// Apply `changes` to the stored row, together with any referential
    /// action an identity change triggers.
    pub fn update(&self, changes: Row) -> Completion<Record> {
        let entity = self.entity.clone();
        let Some(id) = self.id() else {
            return Completion::ready(Err(missing_identity(&entity)));
        };
        match self.session() {
            Ok(session) => session.run(move |ctx| executor::update(ctx, entity, id, changes)),
            Err(err) => Completion::ready(Err(err)),
        }
    }

    /// Delete the stored row, with whatever its dependents' delete actions
    /// require. Deleting a row that is already gone succeeds.
    pub fn destroy(&self) -> Completion<()> {
        let entity = self.entity.clone();
        let Some(id) = self.id() else {
            return Completion::ready(Err(missing_identity(&entity)));
        };
        match self.session() {
            Ok(session) => session.run(move |ctx| executor::destroy(ctx, entity, id)),
            Err(err) => Completion::ready(Err(err)),
        }
    }

    /// Dependents of this record of entity type `target`.
    pub fn get_associated(&self, target: &str) -> Completion<Vec<Record>> {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => return Completion::ready(Err(err)),
        };
        let assoc = match session.registry().find_association(&self.entity, target, None) {
            Ok(assoc) => assoc.clone(),
            Err(err) => return Completion::ready(Err(err)),
        };
        let Some(id) = self.id() else {
            return Completion::ready(Err(missing_identity(&self.entity)));
        };
        session.run(move |ctx| executor::get_associated(ctx, assoc, id))
    }

    /// Make `children` the only dependents of this record of type `target`.
    pub fn set_associated(&self, target: &str, children: &[Record]) -> Completion<()> {
        let session = match self.session() {
            Ok(session) => session,
            Err(err) => return Completion::ready(Err(err)),
        };
        let assoc = match session.registry().find_association(&self.entity, target, None) {
            Ok(assoc) => assoc.clone(),
            Err(err) => return Completion::ready(Err(err)),
        };
        session.set_associated_by(assoc, self, children)
    }

    fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.session.upgrade().ok_or_else(|| {
            Error::from(StoreError::new(
                StoreErrorKind::Closed,
                format!("session of {} record was torn down", self.entity),
            ))
        })
    }
}

fn missing_identity(entity: &str) -> Error {
    Error::Validation(format!("{entity} record has no {IDENTITY_COLUMN}"))
}
