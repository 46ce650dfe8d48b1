use std::path::Path;

use cascadia_core::{ModelDefinition, validate_model_json};

use crate::CliError;

/// Read a model definition from a `.json` or `.toml` file and validate it
/// against the model JSON Schema.
pub fn load_model(path: &Path) -> Result<ModelDefinition, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| CliError::InvalidConfig(format!("cannot read {}: {err}", path.display())))?;
    let document = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str::<serde_json::Value>(&text)?,
        Some("toml") => toml::from_str::<serde_json::Value>(&text)?,
        _ => {
            return Err(CliError::InvalidConfig(format!(
                "{}: model files must end in .json or .toml",
                path.display()
            )));
        }
    };
    let model = validate_model_json(&document)?;
    tracing::debug!(
        event = "model_loaded",
        path = %path.display(),
        entities = model.entities.len(),
        associations = model.associations.len(),
    );
    Ok(model)
}
