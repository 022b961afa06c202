//! Declarative runtime configuration loaded from YAML or JSON.
//!
//! The file declares store-level settings (history capacity, persisted
//! branches) and per-module configuration entries. Module definitions
//! (factories) always come from code; config entries only patch the
//! configuration of registered ids.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{RuntimeError, RuntimeResult};
use crate::modules::ModuleConfigPatch;
use crate::store::history::DEFAULT_CAPACITY;
use crate::store::path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub history_capacity: usize,
    /// Key of the external persistence slot.
    pub storage_key: String,
    /// Dot paths of the branches serialized after every mutation.
    pub persisted_paths: Vec<String>,
    /// Default initial tree; must be an object when present.
    pub initial_state: Option<Value>,
    pub modules: Vec<ModuleEntry>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_CAPACITY,
            storage_key: "modkit".to_string(),
            persisted_paths: Vec::new(),
            initial_state: None,
            modules: Vec::new(),
        }
    }
}

/// One module's declarative configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_options")]
    pub options: Value,
}

fn default_enabled() -> bool {
    true
}

fn default_options() -> Value {
    Value::Object(Map::new())
}

impl ModuleEntry {
    pub fn to_patch(&self) -> ModuleConfigPatch {
        ModuleConfigPatch {
            name: self.name.clone(),
            container: self.container.clone(),
            dependencies: Some(self.dependencies.clone()),
            enabled: Some(self.enabled),
            priority: Some(self.priority),
            options: Some(self.options.clone()),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(content: &str) -> RuntimeResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> RuntimeResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, dispatching on the extension (`.yaml`/`.yml` as
    /// YAML, everything else as JSON).
    pub fn from_file(file: impl AsRef<Path>) -> RuntimeResult<Self> {
        let file = file.as_ref();
        let content = std::fs::read_to_string(file)?;
        match file.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn validate(&self) -> RuntimeResult<()> {
        if let Some(initial_state) = &self.initial_state {
            if !initial_state.is_object() {
                return Err(RuntimeError::InvalidConfiguration {
                    field: "initial_state".to_string(),
                    reason: "must be a JSON object".to_string(),
                });
            }
        }
        for persisted in &self.persisted_paths {
            path::parse(persisted)?;
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.modules {
            if entry.id.is_empty() {
                return Err(RuntimeError::InvalidConfiguration {
                    field: "modules".to_string(),
                    reason: "module id must not be empty".to_string(),
                });
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(RuntimeError::InvalidConfiguration {
                    field: "modules".to_string(),
                    reason: format!("duplicate module id '{}'", entry.id),
                });
            }
            if entry.dependencies.iter().any(|dep| dep == &entry.id) {
                return Err(RuntimeError::InvalidConfiguration {
                    field: "modules".to_string(),
                    reason: format!("module '{}' depends on itself", entry.id),
                });
            }
        }
        Ok(())
    }
}
