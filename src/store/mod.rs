// Reactive state store: tree addressing, history, persistence, cascade
pub mod history;
pub mod path;
pub mod persistence;
pub mod reactive;
pub mod typed;

pub use persistence::{FileBackend, MemoryBackend, PersistenceBackend};
pub use reactive::{
    PersistenceOptions, ReactiveStore, STATE_TOPIC_PREFIX, StateCallback, StateChange,
    StoreOptions, StoreSubscription, WILDCARD_PATH,
};
pub use typed::TypedBranch;
