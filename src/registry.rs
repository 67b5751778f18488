// ABOUTME: Model metadata registry consumed by the extract/inject pipeline
// ABOUTME: Loaded once at startup from a metadata file written by the schema generator

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Static metadata for one replicated model.
///
/// Produced by an external schema generator; the pipeline only reads it.
/// `unique_key_fields` identifies a record for delete/insert reconciliation,
/// `incremental_field` (when present) is a monotonically non-decreasing
/// timestamp used to window extraction and bound reconciliation deletes, and
/// `nullable_json_fields` names JSON columns whose stored-null and
/// column-absent states must be kept distinct on write.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMeta {
    pub name: String,
    pub unique_key_fields: Vec<String>,
    #[serde(default)]
    pub incremental_field: Option<String>,
    #[serde(default)]
    pub nullable_json_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(rename = "model", default)]
    models: Vec<ModelMeta>,
}

/// Immutable map from model name to metadata, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    by_name: HashMap<String, usize>,
    // Declaration order from the generator, used as the default processing order
    models: Vec<ModelMeta>,
}

impl ModelRegistry {
    /// Build a registry from metadata records, validating as we go.
    pub fn from_models(models: Vec<ModelMeta>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(models.len());
        for (idx, meta) in models.iter().enumerate() {
            if meta.name.is_empty() {
                bail!("Model at position {} has an empty name", idx);
            }
            if meta.unique_key_fields.is_empty() {
                bail!("Model '{}' has no unique key fields", meta.name);
            }
            if by_name.insert(meta.name.clone(), idx).is_some() {
                bail!("Duplicate model '{}' in registry", meta.name);
            }
        }
        Ok(Self { by_name, models })
    }

    /// Load the registry from a generated TOML metadata file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model registry from {:?}", path))?;
        let file: RegistryFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse model registry from {:?}", path))?;
        if file.models.is_empty() {
            bail!("Model registry {:?} declares no models", path);
        }
        Self::from_models(file.models)
    }

    /// Look up metadata by model name.
    pub fn get(&self, name: &str) -> Option<&ModelMeta> {
        self.by_name.get(name).map(|&idx| &self.models[idx])
    }

    /// Model names in declaration order.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|m| m.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str) -> ModelMeta {
        ModelMeta {
            name: name.to_string(),
            unique_key_fields: vec!["id".to_string()],
            incremental_field: None,
            nullable_json_fields: Vec::new(),
        }
    }

    #[test]
    fn test_registry_lookup_and_order() {
        let registry =
            ModelRegistry::from_models(vec![meta("orders"), meta("users"), meta("tags")]).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("users").is_some());
        assert!(registry.get("missing").is_none());
        let names: Vec<&str> = registry.model_names().collect();
        assert_eq!(names, vec!["orders", "users", "tags"]);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let err = ModelRegistry::from_models(vec![meta("orders"), meta("orders")]).unwrap_err();
        assert!(err.to_string().contains("Duplicate model"));
    }

    #[test]
    fn test_registry_rejects_missing_unique_keys() {
        let mut bad = meta("orders");
        bad.unique_key_fields.clear();
        let err = ModelRegistry::from_models(vec![bad]).unwrap_err();
        assert!(err.to_string().contains("no unique key fields"));
    }

    #[test]
    fn test_registry_parses_generated_toml() {
        let contents = r#"
            [[model]]
            name = "orders"
            unique_key_fields = ["id"]
            incremental_field = "updatedAt"
            nullable_json_fields = ["metadata"]

            [[model]]
            name = "tags"
            unique_key_fields = ["name", "scope"]
        "#;
        let file: RegistryFile = toml::from_str(contents).unwrap();
        let registry = ModelRegistry::from_models(file.models).unwrap();

        let orders = registry.get("orders").unwrap();
        assert_eq!(orders.incremental_field.as_deref(), Some("updatedAt"));
        assert_eq!(orders.nullable_json_fields, vec!["metadata"]);

        let tags = registry.get("tags").unwrap();
        assert!(tags.incremental_field.is_none());
        assert_eq!(tags.unique_key_fields, vec!["name", "scope"]);
    }
}
