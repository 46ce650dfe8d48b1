use std::collections::BTreeMap;

use crate::association::{Association, AssociationOptions, Cardinality};
use crate::entity::{Attribute, EntityType, IDENTITY_COLUMN, ensure_identifier};
use crate::error::{Error, Result};

/// Entity definition registry plus the association graph between entity
/// types.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entities: BTreeMap<String, EntityType>,
    definition_order: Vec<String>,
    associations: Vec<Association>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity type. Entity types are immutable once declared.
    pub fn define_entity_type(
        &mut self,
        name: impl Into<String>,
        attributes: Vec<Attribute>,
    ) -> Result<EntityType> {
        let entity = EntityType::new(name, attributes)?;
        if self.entities.contains_key(&entity.name) {
            return Err(Error::Configuration(format!(
                "entity type '{}' is already defined",
                entity.name
            )));
        }

        self.definition_order.push(entity.name.clone());
        self.entities.insert(entity.name.clone(), entity.clone());
        Ok(entity)
    }

    /// Record one association from `source` to `target`.
    ///
    /// The foreign-key column is added to the target's table. Declaring the
    /// same ordered pair with the same column twice, or a column that clashes
    /// with an existing column on the target, is rejected.
    pub fn declare_association(
        &mut self,
        source: &str,
        target: &str,
        cardinality: Cardinality,
        options: AssociationOptions,
    ) -> Result<Association> {
        self.require_entity(source)?;
        let target_entity = self.require_entity(target)?;

        let foreign_key = options
            .foreign_key
            .clone()
            .unwrap_or_else(|| Association::default_foreign_key(source));
        ensure_identifier("foreign key", &foreign_key)?;

        if foreign_key == IDENTITY_COLUMN || target_entity.attribute(&foreign_key).is_some() {
            return Err(Error::Configuration(format!(
                "foreign key '{target}.{foreign_key}' clashes with an existing column"
            )));
        }

        if let Some(existing) = self.association_for_column(target, &foreign_key) {
            let message = if existing.source == source {
                format!("association {existing} is already declared")
            } else {
                format!(
                    "foreign key '{target}.{foreign_key}' is already used by {existing}"
                )
            };
            return Err(Error::Configuration(message));
        }

        let association = Association {
            source: source.to_string(),
            target: target.to_string(),
            cardinality,
            foreign_key,
            on_delete: options.on_delete,
            on_update: options.on_update,
        };
        self.associations.push(association.clone());
        Ok(association)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    pub fn require_entity(&self, name: &str) -> Result<&EntityType> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("entity type '{name}' is not declared")))
    }

    /// Entity types in declaration order.
    pub fn entity_types(&self) -> impl Iterator<Item = &EntityType> {
        self.definition_order
            .iter()
            .filter_map(|name| self.entities.get(name))
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    /// Associations whose foreign-key column lives on `entity`.
    pub fn foreign_keys_of<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a Association> {
        self.associations
            .iter()
            .filter(move |assoc| assoc.target == entity)
    }

    /// Associations whose rows reference `entity` (its dependents).
    pub fn dependents_of<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a Association> {
        self.associations
            .iter()
            .filter(move |assoc| assoc.source == entity)
    }

    pub fn association_for_column(&self, entity: &str, column: &str) -> Option<&Association> {
        self.associations
            .iter()
            .find(|assoc| assoc.target == entity && assoc.foreign_key == column)
    }

    /// Find the association from `source` to `target`, optionally by column.
    pub fn find_association(
        &self,
        source: &str,
        target: &str,
        foreign_key: Option<&str>,
    ) -> Result<&Association> {
        let mut matches = self.associations.iter().filter(|assoc| {
            assoc.source == source
                && assoc.target == target
                && foreign_key.is_none_or(|column| assoc.foreign_key == column)
        });
        let first = matches.next().ok_or_else(|| {
            Error::Configuration(format!("no association from '{source}' to '{target}'"))
        })?;
        if matches.next().is_some() {
            return Err(Error::Configuration(format!(
                "several associations from '{source}' to '{target}'; name the foreign key"
            )));
        }
        Ok(first)
    }
}
