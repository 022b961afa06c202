//! Canonical application state with reactive notification and time-travel.
//!
//! The store owns the tree exclusively; callers only ever receive deep
//! clones. Mutations snapshot the pre-mutation tree into history, land the
//! write, persist the designated branches, and then run the notification
//! cascade: exact subscribers of the changed path, subscribers of each
//! strict ancestor from the nearest outward, and wildcard subscribers.
//! Notification plans are collected under the tree lock but callbacks run
//! after it is released, so a subscriber may re-enter the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::errors::{RuntimeError, RuntimeResult};
use crate::events::EventChannel;
use crate::store::history::{DEFAULT_CAPACITY, HistoryStack};
use crate::store::path::{self, PathTrie};
use crate::store::persistence::PersistenceBackend;

/// Subscription key matching every state change.
pub const WILDCARD_PATH: &str = "*";

/// Topic namespace for mirrored state-change events.
pub const STATE_TOPIC_PREFIX: &str = "state:";

/// Delivered to state subscribers on each change.
#[derive(Debug, Clone)]
pub struct StateChange {
    /// The path that was written.
    pub path: String,
    /// Value at the subscriber's own scope: the new value for an exact
    /// subscriber, the current subtree for an ancestor subscriber, the
    /// whole-tree snapshot for a wildcard subscriber.
    pub value: Value,
    /// Pre-mutation value at the changed path. `None` for ancestor
    /// notifications (ancestors only learn that something beneath them
    /// changed) and when the path did not exist before.
    pub old_value: Option<Value>,
}

/// Callback signature for state subscribers. An `Err` is caught and logged;
/// it never reaches the mutator or sibling subscribers.
pub type StateCallback = Arc<dyn Fn(&StateChange) -> RuntimeResult<()> + Send + Sync>;

struct StateRegistration {
    id: Uuid,
    callback: StateCallback,
    cancelled: AtomicBool,
}

impl StateRegistration {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Capability to remove exactly one state subscription.
pub struct StoreSubscription {
    registration: Arc<StateRegistration>,
}

impl StoreSubscription {
    pub fn id(&self) -> Uuid {
        self.registration.id
    }

    pub fn unsubscribe(self) {
        self.registration.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Which branches are serialized to the external slot, and where.
pub struct PersistenceOptions {
    pub backend: Arc<dyn PersistenceBackend>,
    pub key: String,
    /// Dot paths of the branches to persist. Everything else stays volatile.
    pub paths: Vec<String>,
}

pub struct StoreOptions {
    /// Default initial shape of the tree; must be a JSON object.
    pub initial_state: Value,
    pub history_capacity: usize,
    pub persistence: Option<PersistenceOptions>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            initial_state: Value::Object(Map::new()),
            history_capacity: DEFAULT_CAPACITY,
            persistence: None,
        }
    }
}

struct StoreInner {
    tree: Value,
    trie: PathTrie<Arc<StateRegistration>>,
    wildcard: Vec<Arc<StateRegistration>>,
    history: HistoryStack,
}

struct Notification {
    registration: Arc<StateRegistration>,
    change: StateChange,
}

/// One changed path's worth of queued callbacks plus its mirrored event.
struct Cascade {
    notifications: Vec<Notification>,
    mirror: (String, Value),
}

/// Hierarchical key-path state container with subscriptions, linear
/// undo/redo history, and pluggable persistence. State changes are mirrored
/// on the injected [`EventChannel`] under the `state:<path>` namespace.
pub struct ReactiveStore {
    inner: RwLock<StoreInner>,
    events: Arc<EventChannel>,
    default_tree: Value,
    persistence: Option<PersistenceOptions>,
}

impl ReactiveStore {
    /// Build a store over `options.initial_state`, reading any persisted
    /// snapshot back and shallow-merging it into the designated branches.
    pub fn new(options: StoreOptions, events: Arc<EventChannel>) -> RuntimeResult<Self> {
        if !options.initial_state.is_object() {
            return Err(RuntimeError::InvalidConfiguration {
                field: "initial_state".to_string(),
                reason: "must be a JSON object".to_string(),
            });
        }

        let mut tree = options.initial_state.clone();
        if let Some(persistence) = &options.persistence {
            match persistence.backend.load(&persistence.key) {
                Ok(Some(saved)) => {
                    merge_persisted(&mut tree, &saved, &persistence.paths);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(key = %persistence.key, %error, "failed to load persisted state");
                }
            }
        }

        Ok(Self {
            inner: RwLock::new(StoreInner {
                tree,
                trie: PathTrie::new(),
                wildcard: Vec::new(),
                history: HistoryStack::new(options.history_capacity),
            }),
            events,
            default_tree: options.initial_state,
            persistence: options.persistence,
        })
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `path`; `None` if any segment is absent or the stored value
    /// is an explicit null. Never an error.
    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = path::parse(path).ok()?;
        let inner = self.read_inner();
        path::get_at(&inner.tree, &segments)
            .filter(|value| !value.is_null())
            .cloned()
    }

    /// Resolve `path`, falling back to `default` when absent.
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// Resolve `path` into a typed value.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> RuntimeResult<Option<T>> {
        match self.get(path) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Deep copy of the entire tree.
    pub fn snapshot(&self) -> Value {
        self.read_inner().tree.clone()
    }

    /// Write `value` at `path` (wholesale replace, no deep merge), record
    /// history, persist, and run the notification cascade.
    pub fn set(&self, path: &str, value: Value) -> RuntimeResult<()> {
        self.apply_set(path, value, true)
    }

    /// Like [`set`](Self::set) but without notifying subscribers.
    pub fn set_silent(&self, path: &str, value: Value) -> RuntimeResult<()> {
        self.apply_set(path, value, false)
    }

    fn apply_set(&self, path: &str, value: Value, notify: bool) -> RuntimeResult<()> {
        let segments = path::parse(path)?;
        let mut cascades = Vec::new();
        {
            let mut guard = self.write_inner();
            let inner = &mut *guard;
            let old = path::get_at(&inner.tree, &segments).cloned();
            let pre_mutation = inner.tree.clone();
            inner.history.record(pre_mutation);
            path::set_at(&mut inner.tree, &segments, value);
            self.persist(&inner.tree);
            if notify {
                cascades.push(collect_cascade(inner, path, &segments, old));
            }
        }
        self.dispatch(cascades);
        Ok(())
    }

    /// Remove the value at `path`, if any. History is recorded and the
    /// cascade runs with a null new value.
    pub fn remove(&self, path: &str) -> RuntimeResult<Option<Value>> {
        let segments = path::parse(path)?;
        let mut cascades = Vec::new();
        let removed;
        {
            let mut guard = self.write_inner();
            let inner = &mut *guard;
            let pre_mutation = inner.tree.clone();
            removed = path::remove_at(&mut inner.tree, &segments);
            if removed.is_some() {
                inner.history.record(pre_mutation);
                self.persist(&inner.tree);
                cascades.push(collect_cascade(inner, path, &segments, removed.clone()));
            }
        }
        self.dispatch(cascades);
        Ok(removed)
    }

    /// Apply every write, record one history entry for the whole batch,
    /// persist once, then run one cascade per changed path. All writes land
    /// before any subscriber is notified, so no callback observes a
    /// partially-applied batch.
    pub fn batch_update(&self, updates: Vec<(String, Value)>) -> RuntimeResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        // Validate every path up front so a bad path cannot half-apply.
        let mut parsed = Vec::with_capacity(updates.len());
        for (path, _) in &updates {
            parsed.push(path::parse(path)?);
        }

        let mut cascades = Vec::new();
        {
            let mut guard = self.write_inner();
            let inner = &mut *guard;
            let olds: Vec<Option<Value>> = parsed
                .iter()
                .map(|segments| path::get_at(&inner.tree, segments).cloned())
                .collect();
            let pre_mutation = inner.tree.clone();
            inner.history.record(pre_mutation);
            for ((_, value), segments) in updates.iter().zip(&parsed) {
                path::set_at(&mut inner.tree, segments, value.clone());
            }
            self.persist(&inner.tree);
            for (((path, _), segments), old) in updates.iter().zip(&parsed).zip(olds) {
                cascades.push(collect_cascade(inner, path, segments, old));
            }
        }
        self.dispatch(cascades);
        Ok(())
    }

    /// Register `callback` for changes at `path`, or every change when
    /// `path` is `"*"`.
    pub fn subscribe<F>(&self, path: &str, callback: F) -> RuntimeResult<StoreSubscription>
    where
        F: Fn(&StateChange) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        let registration = Arc::new(StateRegistration {
            id: Uuid::new_v4(),
            callback: Arc::new(callback),
            cancelled: AtomicBool::new(false),
        });

        let mut guard = self.write_inner();
        let inner = &mut *guard;
        if path == WILDCARD_PATH {
            inner.wildcard.retain(|r| !r.is_cancelled());
            inner.wildcard.push(registration.clone());
        } else {
            let segments = path::parse(path)?;
            inner.trie.retain(|r| !r.is_cancelled());
            inner.trie.insert(&segments, registration.clone());
        }

        Ok(StoreSubscription { registration })
    }

    /// Step back one mutation. Wildcard subscribers only; returns `false`
    /// at the start boundary.
    pub fn undo(&self) -> bool {
        self.travel(|inner| {
            let current = inner.tree.clone();
            inner.history.undo(&current)
        })
    }

    /// Step forward one undone mutation. Wildcard subscribers only; returns
    /// `false` at the end boundary.
    pub fn redo(&self) -> bool {
        self.travel(|inner| inner.history.redo())
    }

    fn travel<F>(&self, step: F) -> bool
    where
        F: FnOnce(&mut StoreInner) -> Option<Value>,
    {
        let mut cascades = Vec::new();
        let moved;
        {
            let mut guard = self.write_inner();
            let inner = &mut *guard;
            match step(inner) {
                Some(tree) => {
                    inner.tree = tree;
                    self.persist(&inner.tree);
                    cascades.push(collect_wildcard_cascade(inner));
                    moved = true;
                }
                None => moved = false,
            }
        }
        self.dispatch(cascades);
        moved
    }

    pub fn can_undo(&self) -> bool {
        self.read_inner().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.read_inner().history.can_redo()
    }

    /// Replace the tree with the default initial shape, clear history and
    /// the persisted copy, and notify wildcard subscribers.
    pub fn reset(&self) {
        let mut cascades = Vec::new();
        {
            let mut guard = self.write_inner();
            let inner = &mut *guard;
            inner.tree = self.default_tree.clone();
            inner.history.clear();
            if let Some(persistence) = &self.persistence {
                if let Err(error) = persistence.backend.clear(&persistence.key) {
                    tracing::warn!(key = %persistence.key, %error, "failed to clear persisted state");
                }
            }
            cascades.push(collect_wildcard_cascade(inner));
        }
        self.dispatch(cascades);
    }

    /// Serialize the designated branches after a successful mutation.
    /// Failures log and degrade; they never block the mutation.
    fn persist(&self, tree: &Value) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        let mut snapshot = Value::Object(Map::new());
        for path in &persistence.paths {
            let Ok(segments) = path::parse(path) else {
                tracing::warn!(path = %path, "skipping invalid persisted path");
                continue;
            };
            if let Some(value) = path::get_at(tree, &segments) {
                path::set_at(&mut snapshot, &segments, value.clone());
            }
        }
        if let Err(error) = persistence.backend.save(&persistence.key, &snapshot) {
            tracing::warn!(key = %persistence.key, %error, "failed to persist state");
        }
    }

    /// Run queued callbacks with the lock released, then the mirrored
    /// events. Cancelled registrations never fire; failures are isolated.
    fn dispatch(&self, cascades: Vec<Cascade>) {
        for cascade in cascades {
            for notification in &cascade.notifications {
                if notification.registration.is_cancelled() {
                    continue;
                }
                if let Err(error) = (notification.registration.callback)(&notification.change) {
                    tracing::warn!(
                        path = %notification.change.path,
                        subscriber = %notification.registration.id,
                        %error,
                        "state subscriber failed"
                    );
                }
            }
            let (topic, payload) = cascade.mirror;
            self.events.publish(&topic, payload);
        }
    }
}

impl std::fmt::Debug for ReactiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveStore")
            .field("persisted", &self.persistence.is_some())
            .finish()
    }
}

fn collect_cascade(
    inner: &StoreInner,
    changed_path: &str,
    segments: &[&str],
    old_value: Option<Value>,
) -> Cascade {
    let new_value = path::get_at(&inner.tree, segments)
        .cloned()
        .unwrap_or(Value::Null);
    let mut notifications = Vec::new();

    for registration in inner.trie.exact(segments) {
        notifications.push(Notification {
            registration,
            change: StateChange {
                path: changed_path.to_string(),
                value: new_value.clone(),
                old_value: old_value.clone(),
            },
        });
    }

    for (depth, registrations) in inner.trie.ancestors(segments) {
        let ancestor_value = path::get_at(&inner.tree, &segments[..depth])
            .cloned()
            .unwrap_or(Value::Null);
        for registration in registrations {
            notifications.push(Notification {
                registration,
                change: StateChange {
                    path: changed_path.to_string(),
                    value: ancestor_value.clone(),
                    old_value: None,
                },
            });
        }
    }

    for registration in &inner.wildcard {
        notifications.push(Notification {
            registration: registration.clone(),
            change: StateChange {
                path: changed_path.to_string(),
                value: inner.tree.clone(),
                old_value: old_value.clone(),
            },
        });
    }

    Cascade {
        notifications,
        mirror: (
            format!("{STATE_TOPIC_PREFIX}{changed_path}"),
            json!({
                "path": changed_path,
                "new_value": new_value,
                "old_value": old_value,
            }),
        ),
    }
}

/// Undo/redo/reset notify with the wildcard pattern only; per-path diffing
/// is not computed.
fn collect_wildcard_cascade(inner: &StoreInner) -> Cascade {
    let notifications = inner
        .wildcard
        .iter()
        .map(|registration| Notification {
            registration: registration.clone(),
            change: StateChange {
                path: WILDCARD_PATH.to_string(),
                value: inner.tree.clone(),
                old_value: None,
            },
        })
        .collect();

    Cascade {
        notifications,
        mirror: (
            format!("{STATE_TOPIC_PREFIX}{WILDCARD_PATH}"),
            json!({
                "path": WILDCARD_PATH,
                "new_value": inner.tree,
                "old_value": Value::Null,
            }),
        ),
    }
}

/// Shallow-merge the persisted branches into the default tree: object
/// leaves merge key-by-key one level deep, anything else replaces.
fn merge_persisted(tree: &mut Value, saved: &Value, paths: &[String]) {
    for path in paths {
        let Ok(segments) = path::parse(path) else {
            continue;
        };
        let Some(saved_branch) = path::get_at(saved, &segments) else {
            continue;
        };
        let current = path::get_at(tree, &segments);
        match (current, saved_branch) {
            (Some(Value::Object(current_map)), Value::Object(saved_map)) => {
                let mut merged = current_map.clone();
                for (key, value) in saved_map {
                    merged.insert(key.clone(), value.clone());
                }
                path::set_at(tree, &segments, Value::Object(merged));
            }
            _ => path::set_at(tree, &segments, saved_branch.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::persistence::MemoryBackend;
    use serde_json::json;

    fn store() -> ReactiveStore {
        ReactiveStore::new(StoreOptions::default(), Arc::new(EventChannel::new())).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = store();
        store.set("agent.status", json!("running")).unwrap();
        assert_eq!(store.get("agent.status"), Some(json!("running")));
        assert_eq!(store.get("agent.missing"), None);
        assert_eq!(store.get_or("agent.missing", json!("idle")), json!("idle"));
    }

    #[test]
    fn null_leaf_reads_as_absent() {
        let store = store();
        store.set("ui.theme", Value::Null).unwrap();
        assert_eq!(store.get("ui.theme"), None);
        assert_eq!(store.get_or("ui.theme", json!("dark")), json!("dark"));
    }

    #[test]
    fn set_replaces_wholesale() {
        let store = store();
        store.set("ui", json!({"theme": "dark", "zoom": 2})).unwrap();
        store.set("ui", json!({"theme": "light"})).unwrap();
        assert_eq!(store.get("ui"), Some(json!({"theme": "light"})));
    }

    #[test]
    fn invalid_path_on_write_is_an_error() {
        let store = store();
        assert!(matches!(
            store.set("", json!(1)),
            Err(RuntimeError::InvalidPath { .. })
        ));
        assert!(matches!(
            store.set("a..b", json!(1)),
            Err(RuntimeError::InvalidPath { .. })
        ));
    }

    #[test]
    fn merge_persisted_is_shallow() {
        let mut tree = json!({"ui": {"theme": "dark", "zoom": 1}, "data": {"live": true}});
        let saved = json!({"ui": {"theme": "light"}});
        merge_persisted(&mut tree, &saved, &["ui".to_string()]);
        assert_eq!(
            tree,
            json!({"ui": {"theme": "light", "zoom": 1}, "data": {"live": true}})
        );
    }

    #[test]
    fn persisted_branches_restore_on_construction() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed("app", json!({"ui": {"theme": "light"}}));

        let options = StoreOptions {
            initial_state: json!({"ui": {"theme": "dark", "zoom": 1}, "agents": {}}),
            persistence: Some(PersistenceOptions {
                backend: backend.clone(),
                key: "app".to_string(),
                paths: vec!["ui".to_string()],
            }),
            ..Default::default()
        };
        let store = ReactiveStore::new(options, Arc::new(EventChannel::new())).unwrap();

        assert_eq!(store.get("ui.theme"), Some(json!("light")));
        assert_eq!(store.get("ui.zoom"), Some(json!(1)));
    }

    #[test]
    fn only_designated_branches_persist() {
        let backend = Arc::new(MemoryBackend::new());
        let options = StoreOptions {
            initial_state: json!({"ui": {}, "agents": {}}),
            persistence: Some(PersistenceOptions {
                backend: backend.clone(),
                key: "app".to_string(),
                paths: vec!["ui".to_string()],
            }),
            ..Default::default()
        };
        let store = ReactiveStore::new(options, Arc::new(EventChannel::new())).unwrap();

        store.set("ui.theme", json!("dark")).unwrap();
        store.set("agents.count", json!(4)).unwrap();

        assert_eq!(
            backend.load("app").unwrap(),
            Some(json!({"ui": {"theme": "dark"}}))
        );
    }

    #[test]
    fn reset_restores_defaults_and_clears_persisted_copy() {
        let backend = Arc::new(MemoryBackend::new());
        let options = StoreOptions {
            initial_state: json!({"ui": {"theme": "dark"}}),
            persistence: Some(PersistenceOptions {
                backend: backend.clone(),
                key: "app".to_string(),
                paths: vec!["ui".to_string()],
            }),
            ..Default::default()
        };
        let store = ReactiveStore::new(options, Arc::new(EventChannel::new())).unwrap();

        store.set("ui.theme", json!("light")).unwrap();
        store.reset();

        assert_eq!(store.get("ui.theme"), Some(json!("dark")));
        assert_eq!(backend.load("app").unwrap(), None);
        assert!(!store.can_undo());
    }
}
