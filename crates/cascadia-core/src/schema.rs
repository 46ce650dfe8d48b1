use serde::{Deserialize, Serialize};

use crate::association::ReferentialAction;
use crate::entity::IDENTITY_COLUMN;
use crate::types::DataType;

/// Physical table definition derived from an entity type and its incoming
/// associations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeyDef> {
        self.foreign_keys.iter().find(|fk| fk.name == name)
    }

    pub fn primary_key(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.primary_key)
    }

    /// Same table with constraints removed, as created before a deferred
    /// attachment.
    pub fn without_foreign_keys(&self) -> Self {
        Self {
            name: self.name.clone(),
            columns: self.columns.clone(),
            foreign_keys: Vec::new(),
        }
    }
}

/// Column definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            auto_increment: false,
            unique: false,
        }
    }

    /// Store-assigned integer identity column.
    pub fn identity() -> Self {
        Self {
            name: IDENTITY_COLUMN.to_string(),
            data_type: DataType::Integer,
            nullable: false,
            primary_key: true,
            auto_increment: true,
            unique: false,
        }
    }
}

/// Single-column foreign key referencing another table's identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub name: String,
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}
