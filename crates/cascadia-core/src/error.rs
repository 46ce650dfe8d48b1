use thiserror::Error;

/// Core error type shared across Cascadia crates.
///
/// Configuration and schema errors surface synchronously from definition and
/// sync calls. The remaining variants reach callers through an operation's
/// error continuation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An entity or association declaration is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Table dependencies cannot be ordered or attached on this store.
    #[error("schema error: {0}")]
    Schema(String),
    /// An attribute value was rejected before reaching the store.
    #[error("validation error: {0}")]
    Validation(String),
    /// The record an operation targets no longer exists.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: i64 },
    /// A restrict rule (or an emulated reference check) blocked the operation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(ConstraintViolation),
    /// The underlying store rejected a statement.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    /// True for referential failures, whether enforced by the engine or
    /// reported natively by the store.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::ConstraintViolation(_) => true,
            Error::Store(err) => err.kind == StoreErrorKind::ForeignKeyViolation,
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Convenience alias for results returned by Cascadia crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Operation that tripped a referential rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ViolationOperation {
    #[error("delete")]
    Delete,
    #[error("update")]
    Update,
    /// Insert or update of a foreign key pointing at a missing row.
    #[error("reference")]
    Reference,
}

/// Details of a referential rule that blocked an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{operation} on {entity} blocked by {constraint} ({count} referencing {referencing_entity} row(s))"
)]
pub struct ConstraintViolation {
    pub constraint: String,
    pub entity: String,
    pub referencing_entity: String,
    pub operation: ViolationOperation,
    pub count: u64,
}

/// Failure classes reported by store adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreErrorKind {
    #[error("foreign key violation")]
    ForeignKeyViolation,
    #[error("unique violation")]
    UniqueViolation,
    #[error("not-null violation")]
    NotNullViolation,
    #[error("undefined table")]
    UndefinedTable,
    #[error("duplicate table")]
    DuplicateTable,
    #[error("dependent objects exist")]
    DependentObjects,
    #[error("unsupported")]
    Unsupported,
    #[error("connection error")]
    Connection,
    #[error("session closed")]
    Closed,
    #[error("internal error")]
    Internal,
}

/// Error returned by a store adapter for one statement or unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unsupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_fk_violation_counts_as_constraint_violation() {
        let err = Error::from(StoreError::new(
            StoreErrorKind::ForeignKeyViolation,
            "update or delete on table \"User\" violates foreign key constraint",
        ));
        assert!(err.is_constraint_violation());

        let err = Error::from(StoreError::new(StoreErrorKind::UniqueViolation, "dup"));
        assert!(!err.is_constraint_violation());
    }

    #[test]
    fn violation_message_names_constraint() {
        let err = Error::ConstraintViolation(ConstraintViolation {
            constraint: "Task_UserId_fkey".to_string(),
            entity: "User".to_string(),
            referencing_entity: "Task".to_string(),
            operation: ViolationOperation::Delete,
            count: 2,
        });
        assert_eq!(
            err.to_string(),
            "constraint violation: delete on User blocked by Task_UserId_fkey (2 referencing Task row(s))"
        );
    }
}
