//! Typed views over individual state branches.
//!
//! The generic dot-path API trades type safety for flexibility; a
//! `TypedBranch` recovers it for a known branch by round-tripping through
//! serde, while the path-based subscribe stays available for cross-cutting
//! concerns.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::RuntimeResult;
use crate::store::path;
use crate::store::reactive::{ReactiveStore, StoreSubscription};

/// A typed accessor for one branch of the state tree.
pub struct TypedBranch<T> {
    store: Arc<ReactiveStore>,
    path: String,
    _marker: PhantomData<fn() -> T>,
}

impl ReactiveStore {
    /// Create a typed view over the branch at `path`.
    pub fn branch<T>(self: &Arc<Self>, path: &str) -> RuntimeResult<TypedBranch<T>> {
        path::parse(path)?;
        Ok(TypedBranch {
            store: self.clone(),
            path: path.to_string(),
            _marker: PhantomData,
        })
    }
}

impl<T> TypedBranch<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read and deserialize the branch; `None` when absent.
    pub fn read(&self) -> RuntimeResult<Option<T>> {
        self.store.get_as(&self.path)
    }

    /// Serialize and write the branch, with the usual history entry and
    /// notification cascade.
    pub fn write(&self, value: &T) -> RuntimeResult<()> {
        self.store.set(&self.path, serde_json::to_value(value)?)
    }

    /// Read-modify-write helper. `update` receives the current value (or
    /// `None`) and returns the value to store.
    pub fn update<F>(&self, update: F) -> RuntimeResult<()>
    where
        F: FnOnce(Option<T>) -> T,
    {
        let current = self.read()?;
        self.write(&update(current))
    }

    /// Subscribe to this branch. The callback receives the typed new value
    /// at the branch, or `None` when it is absent or fails to deserialize.
    pub fn subscribe<F>(&self, callback: F) -> RuntimeResult<StoreSubscription>
    where
        F: Fn(Option<T>) -> RuntimeResult<()> + Send + Sync + 'static,
        T: 'static,
    {
        self.store.subscribe(&self.path, move |change| {
            let typed = serde_json::from_value(change.value.clone()).ok();
            callback(typed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventChannel;
    use crate::store::reactive::StoreOptions;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct UiPrefs {
        theme: String,
        zoom: u32,
    }

    fn store() -> Arc<ReactiveStore> {
        Arc::new(ReactiveStore::new(StoreOptions::default(), Arc::new(EventChannel::new())).unwrap())
    }

    #[test]
    fn typed_read_write_round_trip() {
        let store = store();
        let branch: TypedBranch<UiPrefs> = store.branch("ui.prefs").unwrap();

        assert_eq!(branch.read().unwrap(), None);
        branch
            .write(&UiPrefs {
                theme: "dark".into(),
                zoom: 2,
            })
            .unwrap();

        assert_eq!(store.get("ui.prefs.theme"), Some(json!("dark")));
        assert_eq!(branch.read().unwrap().unwrap().zoom, 2);
    }

    #[test]
    fn update_sees_current_value() {
        let store = store();
        let branch: TypedBranch<UiPrefs> = store.branch("ui.prefs").unwrap();
        branch
            .write(&UiPrefs {
                theme: "dark".into(),
                zoom: 1,
            })
            .unwrap();

        branch
            .update(|current| {
                let mut prefs = current.unwrap();
                prefs.zoom += 1;
                prefs
            })
            .unwrap();

        assert_eq!(branch.read().unwrap().unwrap().zoom, 2);
    }
}
