//! Dependency-ordered module lifecycle orchestration.
//!
//! The orchestrator is a registry of module blueprints plus the live
//! instances it has brought up. Initialization resolves declared
//! dependencies depth-first with explicit cycle detection; `init_all`
//! processes enabled modules by descending priority and treats each module
//! as an independent failure domain. Teardown refuses to strand live
//! dependents unless explicitly cascaded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::errors::{RuntimeError, RuntimeResult};
use crate::events::EventChannel;
use crate::modules::config::{ModuleConfig, ModuleConfigPatch, ModuleInfo};
use crate::modules::module::{Module, ModuleContext, ModuleDefinition};
use crate::store::ReactiveStore;

/// Lifecycle event topics published on the channel.
pub const TOPIC_REGISTERED: &str = "module:registered";
pub const TOPIC_INITIALIZED: &str = "module:initialized";
pub const TOPIC_INIT_FAILED: &str = "module:init-failed";
pub const TOPIC_DESTROYED: &str = "module:destroyed";

struct ModuleRecord {
    definition: ModuleDefinition,
    config: ModuleConfig,
    instance: Option<Box<dyn Module>>,
    initialized_at: Option<DateTime<Utc>>,
}

/// Outcome of an `init_all` pass. Failures are isolated per module and
/// collected here instead of aborting the pass.
#[derive(Debug, Default)]
pub struct InitReport {
    pub initialized: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, RuntimeError)>,
}

impl InitReport {
    pub fn all_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

enum VisitState {
    Visiting,
    Done,
}

/// Registry and lifecycle manager for named modules with declared
/// dependencies and priorities.
pub struct ModuleOrchestrator {
    store: Arc<ReactiveStore>,
    events: Arc<EventChannel>,
    records: HashMap<String, ModuleRecord>,
    registration_order: Vec<String>,
    init_sequence: Vec<String>,
}

impl ModuleOrchestrator {
    pub fn new(store: Arc<ReactiveStore>, events: Arc<EventChannel>) -> Self {
        Self {
            store,
            events,
            records: HashMap::new(),
            registration_order: Vec::new(),
            init_sequence: Vec::new(),
        }
    }

    /// Store a module blueprint. Re-registering an existing id overwrites
    /// the blueprint with a warning and leaves any live instance untouched.
    pub fn register(&mut self, id: &str, definition: ModuleDefinition, mut config: ModuleConfig) {
        if config.name.is_empty() {
            config.name = id.to_string();
        }
        match self.records.get_mut(id) {
            Some(record) => {
                tracing::warn!(module = %id, "re-registering module, overwriting blueprint");
                record.definition = definition;
                record.config = config;
            }
            None => {
                self.registration_order.push(id.to_string());
                self.records.insert(
                    id.to_string(),
                    ModuleRecord {
                        definition,
                        config,
                        instance: None,
                        initialized_at: None,
                    },
                );
            }
        }
        self.events.publish(TOPIC_REGISTERED, json!({ "id": id }));
    }

    /// Initialize `id` and, depth-first, every dependency before it.
    /// Idempotent for already-initialized modules; a disabled module is a
    /// no-op success. Errors (unknown dependency, cycle, failing hook)
    /// propagate to the caller.
    pub async fn init(&mut self, id: &str) -> RuntimeResult<()> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| RuntimeError::UnknownModule {
                module_id: id.to_string(),
            })?;
        if record.initialized_at.is_some() {
            return Ok(());
        }
        if !record.config.enabled {
            tracing::debug!(module = %id, "skipping disabled module");
            return Ok(());
        }

        let order = self.resolve_init_order(id)?;
        for module_id in order {
            self.init_single(&module_id).await?;
        }
        Ok(())
    }

    /// Dependencies-first order ending at `root`, excluding nothing; the
    /// per-module step skips what is already live. Fails fast on unknown
    /// dependencies and on cycles, naming the offending chain.
    fn resolve_init_order(&self, root: &str) -> RuntimeResult<Vec<String>> {
        let mut order = Vec::new();
        let mut state: HashMap<String, VisitState> = HashMap::new();
        let mut chain: Vec<String> = Vec::new();
        self.visit(root, &mut state, &mut chain, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        id: &str,
        state: &mut HashMap<String, VisitState>,
        chain: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> RuntimeResult<()> {
        match state.get(id) {
            Some(VisitState::Done) => return Ok(()),
            Some(VisitState::Visiting) => {
                let start = chain.iter().position(|entry| entry == id).unwrap_or(0);
                let mut cycle: Vec<String> = chain[start..].to_vec();
                cycle.push(id.to_string());
                return Err(RuntimeError::DependencyCycle { chain: cycle });
            }
            None => {}
        }

        let record = self.records.get(id).ok_or_else(|| match chain.last() {
            Some(parent) => RuntimeError::UnknownDependency {
                module_id: parent.clone(),
                dependency: id.to_string(),
            },
            None => RuntimeError::UnknownModule {
                module_id: id.to_string(),
            },
        })?;

        state.insert(id.to_string(), VisitState::Visiting);
        chain.push(id.to_string());
        for dependency in &record.config.dependencies {
            self.visit(dependency, state, chain, order)?;
        }
        chain.pop();
        state.insert(id.to_string(), VisitState::Done);
        order.push(id.to_string());
        Ok(())
    }

    /// Bring up one module: instantiate, await its init hook, render into
    /// the configured container if any, mark initialized, announce.
    async fn init_single(&mut self, id: &str) -> RuntimeResult<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule {
                module_id: id.to_string(),
            })?;
        if record.initialized_at.is_some() {
            return Ok(());
        }
        if !record.config.enabled {
            // Disabled dependency reached through an enabled dependent.
            tracing::warn!(module = %id, "dependency is disabled, skipping");
            return Ok(());
        }

        let ctx = ModuleContext {
            store: self.store.clone(),
            events: self.events.clone(),
            config: record.config.clone(),
        };

        let mut instance = record
            .definition
            .instantiate(id, &ctx)
            .map_err(|error| lifecycle_error(id, "create", error))?;

        instance
            .init(&ctx)
            .await
            .map_err(|error| lifecycle_error(id, "init", error))?;

        if ctx.config.container.is_some() {
            let markup = instance
                .render(&ctx)
                .map_err(|error| lifecycle_error(id, "render", error))?;
            if let Some(markup) = markup {
                tracing::debug!(module = %id, bytes = markup.len(), "module rendered");
                instance
                    .after_mount(&ctx)
                    .map_err(|error| lifecycle_error(id, "after_mount", error))?;
            }
        }

        record.instance = Some(instance);
        record.initialized_at = Some(Utc::now());
        self.init_sequence.push(id.to_string());
        tracing::debug!(module = %id, "module initialized");
        self.events.publish(TOPIC_INITIALIZED, json!({ "id": id }));
        Ok(())
    }

    /// Initialize every enabled module by descending priority (registration
    /// order breaks ties). Each module is an independent failure domain: a
    /// failing init is caught, logged, and announced, and the pass
    /// continues.
    pub async fn init_all(&mut self) -> InitReport {
        let mut report = InitReport::default();
        let mut enabled: Vec<(String, i32, usize)> = Vec::new();
        for (index, id) in self.registration_order.iter().enumerate() {
            if let Some(record) = self.records.get(id) {
                if record.config.enabled {
                    enabled.push((id.clone(), record.config.priority, index));
                } else {
                    report.skipped.push(id.clone());
                }
            }
        }
        enabled.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        for (id, _, _) in enabled {
            match self.init(&id).await {
                Ok(()) => report.initialized.push(id),
                Err(error) => {
                    tracing::error!(module = %id, %error, "module init failed");
                    self.events.publish(
                        TOPIC_INIT_FAILED,
                        json!({ "id": id, "error": error.to_string() }),
                    );
                    report.failed.push((id, error));
                }
            }
        }
        report
    }

    /// Tear down `id`. Refuses while initialized dependents exist; use
    /// [`destroy_cascade`](Self::destroy_cascade) to take them down too.
    /// Destroying a module that is not live is a no-op.
    pub async fn destroy(&mut self, id: &str) -> RuntimeResult<()> {
        if !self.records.contains_key(id) {
            return Err(RuntimeError::UnknownModule {
                module_id: id.to_string(),
            });
        }
        if !self.is_initialized(id) {
            return Ok(());
        }
        let dependents = self.live_dependents(id);
        if !dependents.is_empty() {
            return Err(RuntimeError::LiveDependents {
                module_id: id.to_string(),
                dependents,
            });
        }
        self.destroy_single(id).await
    }

    /// Tear down `id` and every initialized module that depends on it,
    /// transitively, dependents first (reverse initialization order).
    pub async fn destroy_cascade(&mut self, id: &str) -> RuntimeResult<()> {
        if !self.records.contains_key(id) {
            return Err(RuntimeError::UnknownModule {
                module_id: id.to_string(),
            });
        }
        for module_id in self.dependent_closure(id) {
            self.destroy_single(&module_id).await?;
        }
        Ok(())
    }

    /// Tear down every live module in reverse initialization order. Hook
    /// failures are logged per module and do not stop the pass.
    pub async fn destroy_all(&mut self) {
        let order: Vec<String> = self.init_sequence.iter().rev().cloned().collect();
        for id in order {
            if let Err(error) = self.destroy_single(&id).await {
                tracing::error!(module = %id, %error, "module destroy failed");
            }
        }
        self.init_sequence.clear();
    }

    async fn destroy_single(&mut self, id: &str) -> RuntimeResult<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule {
                module_id: id.to_string(),
            })?;
        let Some(mut instance) = record.instance.take() else {
            return Ok(());
        };
        record.initialized_at = None;
        let ctx = ModuleContext {
            store: self.store.clone(),
            events: self.events.clone(),
            config: record.config.clone(),
        };
        self.init_sequence.retain(|entry| entry != id);

        // Registry state is already consistent; a failing hook only
        // propagates after the instance has been removed.
        let result = instance
            .destroy(&ctx)
            .await
            .map_err(|error| lifecycle_error(id, "destroy", error));
        self.events.publish(TOPIC_DESTROYED, json!({ "id": id }));
        result
    }

    /// Ids of initialized modules that declare `id` as a dependency.
    fn live_dependents(&self, id: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .records
            .iter()
            .filter(|(_, record)| {
                record.initialized_at.is_some()
                    && record.config.dependencies.iter().any(|dep| dep == id)
            })
            .map(|(dependent, _)| dependent.clone())
            .collect();
        dependents.sort();
        dependents
    }

    /// `id` plus its transitive initialized dependents, ordered for
    /// teardown (reverse initialization order).
    fn dependent_closure(&self, id: &str) -> Vec<String> {
        let mut members = vec![id.to_string()];
        let mut frontier = vec![id.to_string()];
        while let Some(current) = frontier.pop() {
            for dependent in self.live_dependents(&current) {
                if !members.contains(&dependent) {
                    members.push(dependent.clone());
                    frontier.push(dependent);
                }
            }
        }
        let mut ordered: Vec<String> = self
            .init_sequence
            .iter()
            .rev()
            .filter(|entry| members.contains(entry))
            .cloned()
            .collect();
        // The target itself may not be live; destroy_single no-ops then.
        if !ordered.contains(&id.to_string()) {
            ordered.push(id.to_string());
        }
        ordered
    }

    /// Invoke the update hook of a live module.
    pub fn update(&mut self, id: &str) -> RuntimeResult<()> {
        let ctx_parts = (self.store.clone(), self.events.clone());
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule {
                module_id: id.to_string(),
            })?;
        let Some(instance) = record.instance.as_mut() else {
            return Ok(());
        };
        let ctx = ModuleContext {
            store: ctx_parts.0,
            events: ctx_parts.1,
            config: record.config.clone(),
        };
        instance
            .update(&ctx)
            .map_err(|error| lifecycle_error(id, "update", error))
    }

    /// Patch a module's configuration without lifecycle side effects.
    /// Intended for applying declarative config before `init_all`.
    pub fn configure(&mut self, id: &str, patch: &ModuleConfigPatch) -> RuntimeResult<()> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| RuntimeError::UnknownModule {
                module_id: id.to_string(),
            })?;
        patch.apply(&mut record.config);
        Ok(())
    }

    /// Patch a module's configuration in place. Toggling `enabled`
    /// true→false destroys a live instance; false→true initializes it.
    pub async fn update_config(&mut self, id: &str, patch: &ModuleConfigPatch) -> RuntimeResult<()> {
        let (was_enabled, was_initialized) = {
            let record = self
                .records
                .get(id)
                .ok_or_else(|| RuntimeError::UnknownModule {
                    module_id: id.to_string(),
                })?;
            (record.config.enabled, record.initialized_at.is_some())
        };
        // A disabling patch implies a destroy; refuse before committing the
        // patch so a refused destroy cannot leave config and instance at odds.
        if was_enabled && was_initialized && patch.enabled == Some(false) {
            let dependents = self.live_dependents(id);
            if !dependents.is_empty() {
                return Err(RuntimeError::LiveDependents {
                    module_id: id.to_string(),
                    dependents,
                });
            }
        }
        self.configure(id, patch)?;

        let now_enabled = self
            .records
            .get(id)
            .map(|record| record.config.enabled)
            .unwrap_or(false);
        if was_enabled && !now_enabled && was_initialized {
            self.destroy(id).await?;
        } else if !was_enabled && now_enabled && !was_initialized {
            self.init(id).await?;
        }
        Ok(())
    }

    pub async fn set_enabled(&mut self, id: &str, enabled: bool) -> RuntimeResult<()> {
        let patch = ModuleConfigPatch {
            enabled: Some(enabled),
            ..Default::default()
        };
        self.update_config(id, &patch).await
    }

    /// Destroy then re-initialize, for hot replacement during development.
    pub async fn reload(&mut self, id: &str) -> RuntimeResult<()> {
        self.destroy(id).await?;
        self.init(id).await
    }

    pub fn is_initialized(&self, id: &str) -> bool {
        self.records
            .get(id)
            .map(|record| record.initialized_at.is_some())
            .unwrap_or(false)
    }

    /// Live instance lookup.
    pub fn get(&self, id: &str) -> Option<&dyn Module> {
        self.records.get(id)?.instance.as_deref()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut (dyn Module + 'static)> {
        self.records.get_mut(id)?.instance.as_deref_mut()
    }

    pub fn get_config(&self, id: &str) -> Option<&ModuleConfig> {
        self.records.get(id).map(|record| &record.config)
    }

    pub fn initialized_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.records.get(id).and_then(|record| record.initialized_at)
    }

    /// Ids in the order they were initialized.
    pub fn init_order(&self) -> &[String] {
        &self.init_sequence
    }

    /// All registrations, in registration order, with their live flags.
    pub fn list(&self) -> Vec<ModuleInfo> {
        self.registration_order
            .iter()
            .filter_map(|id| {
                self.records.get(id).map(|record| ModuleInfo {
                    id: id.clone(),
                    name: record.config.name.clone(),
                    enabled: record.config.enabled,
                    priority: record.config.priority,
                    dependencies: record.config.dependencies.clone(),
                    initialized: record.initialized_at.is_some(),
                    initialized_at: record.initialized_at,
                })
            })
            .collect()
    }
}

fn lifecycle_error(module_id: &str, phase: &str, error: RuntimeError) -> RuntimeError {
    RuntimeError::Lifecycle {
        module_id: module_id.to_string(),
        phase: phase.to_string(),
        reason: error.to_string(),
    }
}

impl std::fmt::Debug for ModuleOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleOrchestrator")
            .field("registered", &self.records.len())
            .field("initialized", &self.init_sequence.len())
            .finish()
    }
}
