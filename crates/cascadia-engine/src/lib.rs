//! Constraint-aware persistence engine.
//!
//! A [`Session`] owns the entity registry, chooses how referential actions
//! are enforced for its store, synchronizes the physical schema, and runs
//! every create/update/delete inside one atomic unit together with its
//! cascade, restrict and set-null side effects.

pub mod completion;
pub mod config;
mod executor;
pub mod generator;
pub mod record;
pub mod session;
pub mod sync;

pub use completion::{Completion, CompletionState};
pub use config::{DEFAULT_MAX_CASCADE_DEPTH, SessionConfig, StrategyChoice};
pub use generator::{ReferentialStep, StatementGenerator, Strategy};
pub use record::{Criteria, Record};
pub use session::{Model, Session};
pub use sync::{SchemaSynchronizer, SyncOptions, SyncReport, SyncState, plan_schema};
