//! modkit — a lightweight in-process application runtime.
//!
//! Three primitives coordinate otherwise-independent modules: a
//! publish/subscribe [`EventChannel`], a hierarchical [`ReactiveStore`]
//! with undo/redo history and pluggable persistence, and a
//! dependency-ordered [`ModuleOrchestrator`]. A host composes them through
//! [`Runtime`], registers modules, and calls `init_all`.

pub mod errors;
pub mod events;
pub mod modules;
pub mod runtime;
pub mod store;

// Re-export the key types for easier access
pub use errors::{RuntimeError, RuntimeResult};
pub use events::{EventChannel, EventMessage, EventSubscription};
pub use modules::{
    InitReport, Module, ModuleConfig, ModuleConfigPatch, ModuleContext, ModuleDefinition,
    ModuleFactory, ModuleOrchestrator,
};
pub use runtime::{Runtime, RuntimeBuilder, RuntimeConfig};
pub use store::{ReactiveStore, StateChange, StoreOptions, StoreSubscription, TypedBranch};
