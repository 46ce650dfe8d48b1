//! Core contracts for Cascadia.
//!
//! This crate holds the entity definition registry, the association graph,
//! the physical schema model derived from it, and the error taxonomy shared
//! by the store adapters and the engine.

pub mod association;
pub mod entity;
pub mod error;
pub mod graph;
pub mod model;
pub mod registry;
pub mod schema;
pub mod types;
pub mod validation;

pub use association::{Association, AssociationOptions, Cardinality, ReferentialAction};
pub use entity::{Attribute, EntityType, IDENTITY_COLUMN};
pub use error::{
    ConstraintViolation, Error, Result, StoreError, StoreErrorKind, ViolationOperation,
};
pub use graph::{DependencyEdges, DependencyReport, DependencySummary, build_dependency_report};
pub use model::{
    AssociationDefinition, AttributeDefinition, EntityDefinition, ModelDefinition,
    model_json_schema, validate_model_json,
};
pub use registry::Registry;
pub use schema::{ColumnDef, ForeignKeyDef, TableDef};
pub use types::{DataType, Row, Value};
pub use validation::{validate_changes, validate_criteria, validate_values};

/// Current contract version for model definition documents.
pub const MODEL_VERSION: &str = "0.1";
