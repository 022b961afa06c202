// Module contract and lifecycle orchestration
pub mod config;
pub mod module;
pub mod orchestrator;

pub use config::{ModuleConfig, ModuleConfigPatch, ModuleInfo};
pub use module::{Module, ModuleContext, ModuleDefinition, ModuleFactory};
pub use orchestrator::{
    InitReport, ModuleOrchestrator, TOPIC_DESTROYED, TOPIC_INITIALIZED, TOPIC_INIT_FAILED,
    TOPIC_REGISTERED,
};
