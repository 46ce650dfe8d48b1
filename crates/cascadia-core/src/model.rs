use jsonschema::JSONSchema;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde::{Deserialize, Serialize};

use crate::association::{AssociationOptions, Cardinality, ReferentialAction};
use crate::entity::Attribute;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{DataType, Value};

/// Declarative model document (`model.toml` / `model.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelDefinition {
    pub model_version: String,
    pub entities: Vec<EntityDefinition>,
    #[serde(default)]
    pub associations: Vec<AssociationDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_allow_null")]
    pub allow_null: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_allow_null() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AssociationDefinition {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default)]
    pub on_update: ReferentialAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

impl ModelDefinition {
    /// Declare every entity type and association into a fresh registry.
    pub fn into_registry(&self) -> Result<Registry> {
        if self.model_version != crate::MODEL_VERSION {
            return Err(Error::Configuration(format!(
                "unsupported model_version '{}' (expected {})",
                self.model_version,
                crate::MODEL_VERSION
            )));
        }

        let mut registry = Registry::new();
        for entity in &self.entities {
            let attributes = entity
                .attributes
                .iter()
                .map(|attr| Attribute {
                    name: attr.name.clone(),
                    data_type: attr.data_type,
                    allow_null: attr.allow_null,
                    default_value: attr.default.clone(),
                })
                .collect();
            registry.define_entity_type(entity.name.clone(), attributes)?;
        }

        for assoc in &self.associations {
            let mut options = AssociationOptions::default()
                .on_delete(assoc.on_delete)
                .on_update(assoc.on_update);
            if let Some(column) = &assoc.foreign_key {
                options = options.foreign_key(column.clone());
            }
            registry.declare_association(&assoc.source, &assoc.target, assoc.cardinality, options)?;
        }

        Ok(registry)
    }
}

/// Emit the JSON Schema for model definition documents.
pub fn model_json_schema() -> RootSchema {
    schema_for!(ModelDefinition)
}

/// Validate a model document against the JSON Schema, then parse it.
pub fn validate_model_json(document: &serde_json::Value) -> Result<ModelDefinition> {
    let schema = serde_json::to_value(model_json_schema())
        .map_err(|err| Error::Configuration(format!("model schema: {err}")))?;
    let compiled = JSONSchema::compile(&schema)
        .map_err(|err| Error::Configuration(format!("model schema: {err}")))?;

    let issues: Vec<String> = match compiled.validate(document) {
        Ok(()) => Vec::new(),
        Err(errors) => errors
            .map(|error| {
                let path = error.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                format!("{path}: {error}")
            })
            .collect(),
    };
    if !issues.is_empty() {
        return Err(Error::Configuration(format!(
            "invalid model document: {}",
            issues.join("; ")
        )));
    }

    serde_json::from_value(document.clone())
        .map_err(|err| Error::Configuration(format!("invalid model document: {err}")))
}
