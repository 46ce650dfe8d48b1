use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{DataType, Value};

/// Name of the identity column every entity type carries.
pub const IDENTITY_COLUMN: &str = "id";

/// Declared attribute of an entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    pub allow_null: bool,
    pub default_value: Option<Value>,
}

impl Attribute {
    /// Create a nullable attribute without a default.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            allow_null: true,
            default_value: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, DataType::String)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Text)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Boolean)
    }

    pub fn not_null(mut self) -> Self {
        self.allow_null = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// A declared entity type: its name and ordered attributes.
///
/// The identity column is implicit and not part of `attributes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityType {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

impl EntityType {
    pub(crate) fn new(name: impl Into<String>, attributes: Vec<Attribute>) -> Result<Self> {
        let name = name.into();
        ensure_identifier("entity type", &name)?;

        let mut seen = std::collections::BTreeSet::new();
        for attribute in &attributes {
            ensure_identifier("attribute", &attribute.name)?;
            if attribute.name == IDENTITY_COLUMN {
                return Err(Error::Configuration(format!(
                    "attribute '{}.{}' is reserved for the identity column",
                    name, attribute.name
                )));
            }
            if !seen.insert(attribute.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate attribute name: {}.{}",
                    name, attribute.name
                )));
            }
            if let Some(default) = &attribute.default_value {
                if !attribute.data_type.accepts(default) {
                    return Err(Error::Configuration(format!(
                        "default for '{}.{}' is {} but the attribute is {}",
                        name,
                        attribute.name,
                        default.type_name(),
                        attribute.data_type.as_str()
                    )));
                }
            }
        }

        Ok(Self { name, attributes })
    }

    /// Physical table backing this entity type.
    pub fn table_name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

/// Reject names that cannot be used verbatim as quoted SQL identifiers.
pub(crate) fn ensure_identifier(kind: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_');
    if !valid_start || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(Error::Configuration(format!(
            "invalid {kind} name '{name}': use letters, digits and underscores"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identity_attribute() {
        let err = EntityType::new("User", vec![Attribute::integer("id")]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_duplicate_attributes() {
        let err = EntityType::new(
            "User",
            vec![Attribute::string("username"), Attribute::text("username")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn rejects_mistyped_default() {
        let err = EntityType::new("Task", vec![Attribute::integer("priority").with_default("high")])
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_quoted_names() {
        assert!(ensure_identifier("entity type", "User\"; drop").is_err());
        assert!(ensure_identifier("entity type", "1User").is_err());
        assert!(ensure_identifier("entity type", "User_1").is_ok());
    }
}
