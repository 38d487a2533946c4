//! Error types for Toolgate operations

use crate::paths::ResolveError;
use crate::tools::RegistryError;

/// Result type for Toolgate operations
pub type Result<T> = std::result::Result<T, ToolgateError>;

/// Error types for the Toolgate runtime
///
/// The invocation path itself never returns these: failures during a call are
/// folded into an [`InvocationResult`](crate::tools::InvocationResult). These
/// cover bootstrap, configuration and introspection.
#[derive(Debug, thiserror::Error)]
pub enum ToolgateError {
    /// Registration bootstrap failed
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Tool location could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Tool name was never registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<figment::Error> for ToolgateError {
    fn from(err: figment::Error) -> Self {
        ToolgateError::Configuration(err.to_string())
    }
}
