//! Module configuration records and patches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Configuration attached to a registered module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Human-readable name; defaults to the module id at registration.
    pub name: String,
    /// Mount point identifier. Rendering only happens when set.
    pub container: Option<String>,
    /// Ids of modules that must be initialized before this one.
    pub dependencies: Vec<String>,
    pub enabled: bool,
    /// Higher priority initializes earlier in `init_all`.
    pub priority: i32,
    /// Free-form options handed to the module through its context.
    pub options: Value,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            container: None,
            dependencies: Vec::new(),
            enabled: true,
            priority: 0,
            options: Value::Object(Map::new()),
        }
    }
}

impl ModuleConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update applied to a [`ModuleConfig`] in place. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfigPatch {
    pub name: Option<String>,
    pub container: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub options: Option<Value>,
}

impl ModuleConfigPatch {
    pub fn apply(&self, config: &mut ModuleConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(container) = &self.container {
            config.container = Some(container.clone());
        }
        if let Some(dependencies) = &self.dependencies {
            config.dependencies = dependencies.clone();
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            config.priority = priority;
        }
        if let Some(options) = &self.options {
            config.options = options.clone();
        }
    }
}

/// Read-only registration snapshot returned by `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub initialized: bool,
    pub initialized_at: Option<DateTime<Utc>>,
}
