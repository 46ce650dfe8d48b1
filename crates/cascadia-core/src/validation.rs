use crate::entity::{EntityType, IDENTITY_COLUMN};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{DataType, Row, Value};

/// Column accepted in a row of `entity`, as seen by value checks.
struct ColumnRule {
    data_type: DataType,
    allow_null: bool,
}

fn column_rule(registry: &Registry, entity: &EntityType, column: &str) -> Option<ColumnRule> {
    if column == IDENTITY_COLUMN {
        return Some(ColumnRule {
            data_type: DataType::Integer,
            allow_null: false,
        });
    }
    if let Some(attribute) = entity.attribute(column) {
        return Some(ColumnRule {
            data_type: attribute.data_type,
            allow_null: attribute.allow_null,
        });
    }
    registry
        .association_for_column(&entity.name, column)
        .map(|_| ColumnRule {
            data_type: DataType::Integer,
            allow_null: true,
        })
}

fn check_value(entity: &EntityType, column: &str, rule: &ColumnRule, value: &Value) -> Result<()> {
    if value.is_null() {
        if !rule.allow_null {
            return Err(Error::Validation(format!(
                "{}.{column} cannot be null",
                entity.name
            )));
        }
        return Ok(());
    }
    if !rule.data_type.accepts(value) {
        return Err(Error::Validation(format!(
            "{}.{column} expects {} but got {}",
            entity.name,
            rule.data_type.as_str(),
            value.type_name()
        )));
    }
    Ok(())
}

fn lookup(registry: &Registry, entity: &EntityType, column: &str) -> Result<ColumnRule> {
    column_rule(registry, entity, column).ok_or_else(|| {
        Error::Validation(format!("unknown attribute '{column}' for {}", entity.name))
    })
}

/// Validate the values of a new record and fill in attribute defaults.
///
/// Returns the row to insert. The identity column may be supplied explicitly;
/// otherwise the store assigns it.
pub fn validate_values(registry: &Registry, entity: &EntityType, values: &Row) -> Result<Row> {
    let mut row = Row::new();
    for (column, value) in values {
        let rule = lookup(registry, entity, column)?;
        check_value(entity, column, &rule, value)?;
        row.insert(column.clone(), value.clone());
    }

    for attribute in &entity.attributes {
        if row.contains_key(&attribute.name) {
            continue;
        }
        match &attribute.default_value {
            Some(default) => {
                row.insert(attribute.name.clone(), default.clone());
            }
            None if !attribute.allow_null => {
                return Err(Error::Validation(format!(
                    "{}.{} is required",
                    entity.name, attribute.name
                )));
            }
            None => {}
        }
    }

    Ok(row)
}

/// Validate a partial set of changes to an existing record.
pub fn validate_changes(registry: &Registry, entity: &EntityType, changes: &Row) -> Result<()> {
    for (column, value) in changes {
        let rule = lookup(registry, entity, column)?;
        check_value(entity, column, &rule, value)?;
    }
    Ok(())
}

/// Validate equality criteria used by finders and counts.
///
/// Null criteria are allowed on any column and match SQL `IS NULL`.
pub fn validate_criteria(registry: &Registry, entity: &EntityType, criteria: &Row) -> Result<()> {
    for (column, value) in criteria {
        let rule = lookup(registry, entity, column)?;
        if !rule.data_type.accepts(value) {
            return Err(Error::Validation(format!(
                "criterion {}.{column} expects {} but got {}",
                entity.name,
                rule.data_type.as_str(),
                value.type_name()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{AssociationOptions, Cardinality};
    use crate::entity::Attribute;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .define_entity_type("User", vec![Attribute::string("username").not_null()])
            .unwrap();
        registry
            .define_entity_type(
                "Task",
                vec![
                    Attribute::string("title"),
                    Attribute::boolean("done").not_null().with_default(false),
                ],
            )
            .unwrap();
        registry
            .declare_association(
                "User",
                "Task",
                Cardinality::OneToMany,
                AssociationOptions::default(),
            )
            .unwrap();
        registry
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn fills_defaults_and_accepts_foreign_keys() {
        let registry = registry();
        let task = registry.entity("Task").unwrap();
        let values = row(&[("title", "task".into()), ("UserId", Value::Integer(1))]);

        let inserted = validate_values(&registry, task, &values).unwrap();
        assert_eq!(inserted.get("done"), Some(&Value::Bool(false)));
        assert_eq!(inserted.get("UserId"), Some(&Value::Integer(1)));
    }

    #[test]
    fn rejects_missing_required_attribute() {
        let registry = registry();
        let user = registry.entity("User").unwrap();
        let err = validate_values(&registry, user, &Row::new()).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("User.username is required"));
    }

    #[test]
    fn rejects_unknown_and_mistyped_columns() {
        let registry = registry();
        let task = registry.entity("Task").unwrap();

        let err = validate_changes(&registry, task, &row(&[("priority", Value::Integer(1))]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown attribute"));

        let err =
            validate_changes(&registry, task, &row(&[("UserId", "one".into())])).unwrap_err();
        assert!(err.to_string().contains("expects integer"));

        let err = validate_changes(&registry, task, &row(&[("id", Value::Null)])).unwrap_err();
        assert!(err.to_string().contains("cannot be null"));
    }

    #[test]
    fn criteria_allow_null_matches() {
        let registry = registry();
        let task = registry.entity("Task").unwrap();
        validate_criteria(&registry, task, &row(&[("UserId", Value::Null)])).unwrap();
        assert!(validate_criteria(&registry, task, &row(&[("done", 1.into())])).is_err());
    }
}
