//! Top-level composition point.
//!
//! The event channel, store, and orchestrator exist as explicitly
//! constructed instances owned by one [`Runtime`] value and injected into
//! every collaborator; there are no process-wide singletons. Tests build a
//! fresh runtime per case.

pub mod config;
pub mod logging;

pub use config::{ModuleEntry, RuntimeConfig};

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::errors::{RuntimeError, RuntimeResult};
use crate::events::EventChannel;
use crate::modules::{InitReport, ModuleConfig, ModuleDefinition, ModuleOrchestrator};
use crate::store::history::DEFAULT_CAPACITY;
use crate::store::{PersistenceBackend, PersistenceOptions, ReactiveStore, StoreOptions};

/// Owns the three runtime primitives for one application instance.
pub struct Runtime {
    events: Arc<EventChannel>,
    store: Arc<ReactiveStore>,
    orchestrator: ModuleOrchestrator,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    pub fn store(&self) -> &Arc<ReactiveStore> {
        &self.store
    }

    pub fn modules(&self) -> &ModuleOrchestrator {
        &self.orchestrator
    }

    pub fn modules_mut(&mut self) -> &mut ModuleOrchestrator {
        &mut self.orchestrator
    }

    /// Register a module blueprint with the orchestrator.
    pub fn register(&mut self, id: &str, definition: ModuleDefinition, config: ModuleConfig) {
        self.orchestrator.register(id, definition, config);
    }

    /// Apply the module entries of a declarative config to registered
    /// modules. Entries naming unregistered ids are logged and skipped.
    pub fn apply_module_config(&mut self, config: &RuntimeConfig) {
        for entry in &config.modules {
            match self.orchestrator.configure(&entry.id, &entry.to_patch()) {
                Ok(()) => {}
                Err(RuntimeError::UnknownModule { module_id }) => {
                    tracing::warn!(module = %module_id, "config entry for unregistered module, skipping");
                }
                Err(error) => {
                    tracing::warn!(module = %entry.id, %error, "failed to apply module config");
                }
            }
        }
    }

    /// Initialize every enabled module in priority order.
    pub async fn init_all(&mut self) -> InitReport {
        self.orchestrator.init_all().await
    }

    /// Tear down every live module in reverse initialization order.
    pub async fn shutdown(&mut self) {
        self.orchestrator.destroy_all().await;
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

/// Builds a [`Runtime`] with explicit store and persistence settings.
pub struct RuntimeBuilder {
    initial_state: Value,
    history_capacity: usize,
    backend: Option<Arc<dyn PersistenceBackend>>,
    storage_key: String,
    persisted_paths: Vec<String>,
}

impl RuntimeBuilder {
    fn new() -> Self {
        Self {
            initial_state: Value::Object(Map::new()),
            history_capacity: DEFAULT_CAPACITY,
            backend: None,
            storage_key: "modkit".to_string(),
            persisted_paths: Vec::new(),
        }
    }

    /// Default initial shape of the state tree; must be a JSON object.
    pub fn initial_state(mut self, state: Value) -> Self {
        self.initial_state = state;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Persist the configured branches through `backend`. Without a backend
    /// the store runs in-memory only.
    pub fn persistence_backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn persisted_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.persisted_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Take store-level settings from a declarative config. Module entries
    /// are applied separately via [`Runtime::apply_module_config`] once the
    /// module definitions are registered.
    pub fn from_config(mut self, config: &RuntimeConfig) -> Self {
        self.history_capacity = config.history_capacity;
        self.storage_key = config.storage_key.clone();
        self.persisted_paths = config.persisted_paths.clone();
        if let Some(initial_state) = &config.initial_state {
            self.initial_state = initial_state.clone();
        }
        self
    }

    pub fn build(self) -> RuntimeResult<Runtime> {
        let events = Arc::new(EventChannel::new());
        let persistence = match self.backend {
            Some(backend) if !self.persisted_paths.is_empty() => Some(PersistenceOptions {
                backend,
                key: self.storage_key,
                paths: self.persisted_paths,
            }),
            Some(_) => {
                tracing::warn!("persistence backend configured without persisted paths, ignoring");
                None
            }
            None => None,
        };
        let store = Arc::new(ReactiveStore::new(
            StoreOptions {
                initial_state: self.initial_state,
                history_capacity: self.history_capacity,
                persistence,
            },
            events.clone(),
        )?);
        let orchestrator = ModuleOrchestrator::new(store.clone(), events.clone());
        Ok(Runtime {
            events,
            store,
            orchestrator,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
