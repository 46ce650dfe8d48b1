use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Policy applied to referencing rows when the referenced row is deleted or
/// its identity changes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// Unconstrained: nothing is enforced.
    #[default]
    NoAction,
    Cascade,
    Restrict,
    SetNull,
}

impl ReferentialAction {
    pub fn is_default(&self) -> bool {
        matches!(self, ReferentialAction::NoAction)
    }

    /// SQL spelling used in `ON DELETE` / `ON UPDATE` clauses.
    pub fn sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::SetNull => "SET NULL",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

impl FromStr for ReferentialAction {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "no action" | "noaction" => Ok(ReferentialAction::NoAction),
            "cascade" => Ok(ReferentialAction::Cascade),
            "restrict" => Ok(ReferentialAction::Restrict),
            "set null" | "setnull" => Ok(ReferentialAction::SetNull),
            _ => Err(Error::Configuration(format!(
                "unknown referential action '{value}'"
            ))),
        }
    }
}

/// Cardinality of an association from the source's point of view.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Foreign key on the target; many target rows per source row.
    #[default]
    OneToMany,
    /// Foreign key on the target, unique.
    OneToOne,
}

/// Options recognised by `declare_association`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationOptions {
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    /// Overrides the default `<SourceName>Id` column name.
    pub foreign_key: Option<String>,
}

impl AssociationOptions {
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }
}

/// A declared relationship between two entity types.
///
/// The foreign-key column lives on the target table and references the
/// source's identity column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Association {
    pub source: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub foreign_key: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl Association {
    /// Default foreign-key column for a source entity type.
    pub fn default_foreign_key(source: &str) -> String {
        format!("{source}Id")
    }

    /// Whether any referential action is opted into.
    pub fn is_constrained(&self) -> bool {
        !self.on_delete.is_default() || !self.on_update.is_default()
    }

    /// Physical constraint name (`<table>_<column>_fkey`).
    pub fn constraint_name(&self) -> String {
        format!("{}_{}_fkey", self.target, self.foreign_key)
    }

    pub fn is_self_reference(&self) -> bool {
        self.source == self.target
    }
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.cardinality {
            Cardinality::OneToMany => "has_many",
            Cardinality::OneToOne => "has_one",
        };
        write!(
            f,
            "{} {} {} via {}",
            self.source, kind, self.target, self.foreign_key
        )
    }
}
