/// Main error type for the modkit runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    // === Event Channel Errors ===
    #[error("Event topic must be a non-empty string")]
    EmptyTopic,

    #[error("Callback error: {reason}")]
    Callback { reason: String },

    // === State Store Errors ===
    #[error("Invalid state path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Serialization error: {format}: {reason}")]
    Serialization { format: String, reason: String },

    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    // === Module Lifecycle Errors ===
    #[error("Module not found: {module_id}")]
    UnknownModule { module_id: String },

    #[error("Module '{module_id}' depends on unknown module '{dependency}'")]
    UnknownDependency {
        module_id: String,
        dependency: String,
    },

    #[error("Dependency cycle detected: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("Module '{module_id}' failed during {phase}: {reason}")]
    Lifecycle {
        module_id: String,
        phase: String,
        reason: String,
    },

    #[error("Module '{module_id}' cannot be destroyed: live dependents: {}", dependents.join(", "))]
    LiveDependents {
        module_id: String,
        dependents: Vec<String>,
    },

    #[error("Module '{module_id}' was registered as a single instance and has already been consumed")]
    InstanceConsumed { module_id: String },

    // === Configuration Errors ===
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // === General System Errors ===
    #[error("Internal error: {component}: {reason}")]
    Internal { component: String, reason: String },
}

/// Convenience type alias
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Convert common std errors to `RuntimeError`
impl From<serde_json::Error> for RuntimeError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            format: "json".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RuntimeError {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Serialization {
            format: "yaml".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        Self::Internal {
            component: "io".to_string(),
            reason: error.to_string(),
        }
    }
}
