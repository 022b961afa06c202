//! The module contract: what a collaborator implements to plug into the
//! orchestrator. Every hook is optional; the defaults are no-ops.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{RuntimeError, RuntimeResult};
use crate::events::EventChannel;
use crate::modules::config::ModuleConfig;
use crate::store::ReactiveStore;

/// Runtime handles injected into every module at instantiation. Modules
/// reach state through `store` and signal through `events`; they never hold
/// a live reference into either structure's internals.
#[derive(Clone)]
pub struct ModuleContext {
    pub store: Arc<ReactiveStore>,
    pub events: Arc<EventChannel>,
    pub config: ModuleConfig,
}

/// An independently developed unit of work managed through a common
/// lifecycle. `init` and `destroy` may suspend (e.g. a data fetch); they are
/// the runtime's only suspension points.
#[async_trait]
pub trait Module: Send {
    async fn init(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }

    /// Produce markup (or any rendered value) for the configured container.
    /// Only invoked when the config names a container.
    fn render(&mut self, _ctx: &ModuleContext) -> RuntimeResult<Option<String>> {
        Ok(None)
    }

    /// Invoked after a successful render.
    fn after_mount(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }

    fn update(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }

    async fn destroy(&mut self, _ctx: &ModuleContext) -> RuntimeResult<()> {
        Ok(())
    }
}

/// Builds module instances on demand so a module can be re-initialized
/// after a destroy.
pub trait ModuleFactory: Send + Sync {
    fn create(&self, ctx: &ModuleContext) -> RuntimeResult<Box<dyn Module>>;
}

impl<F> ModuleFactory for F
where
    F: Fn(&ModuleContext) -> RuntimeResult<Box<dyn Module>> + Send + Sync,
{
    fn create(&self, ctx: &ModuleContext) -> RuntimeResult<Box<dyn Module>> {
        self(ctx)
    }
}

/// How a registered module is instantiated: through a factory, or from a
/// single pre-built instance that is consumed by its first init.
pub enum ModuleDefinition {
    Factory(Arc<dyn ModuleFactory>),
    Instance(Option<Box<dyn Module>>),
}

impl ModuleDefinition {
    pub fn factory<F: ModuleFactory + 'static>(factory: F) -> Self {
        Self::Factory(Arc::new(factory))
    }

    pub fn instance<M: Module + 'static>(module: M) -> Self {
        Self::Instance(Some(Box::new(module)))
    }

    pub(crate) fn instantiate(
        &mut self,
        module_id: &str,
        ctx: &ModuleContext,
    ) -> RuntimeResult<Box<dyn Module>> {
        match self {
            Self::Factory(factory) => factory.create(ctx),
            Self::Instance(slot) => slot.take().ok_or_else(|| RuntimeError::InstanceConsumed {
                module_id: module_id.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Factory(_) => f.write_str("ModuleDefinition::Factory"),
            Self::Instance(slot) => f
                .debug_tuple("ModuleDefinition::Instance")
                .field(&slot.is_some())
                .finish(),
        }
    }
}
