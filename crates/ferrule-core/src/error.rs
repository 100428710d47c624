//! Error types for ferrule

use thiserror::Error;

/// Main error type for ferrule
#[derive(Error, Debug)]
pub enum RpcError {
    /// No provider could be found for a service
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Connection or store failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame, magic mismatch or unknown selector
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The invoked method failed on the provider
    #[error("Remote execution error: {0}")]
    RemoteExecution(String),

    /// Unknown strategy key or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failed call re-raised by the fail-fast tolerant strategy
    #[error("Service call failed: {0}")]
    CallFailed(#[source] Box<RpcError>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for ferrule operations
pub type RpcResult<T> = Result<T, RpcError>;

impl RpcError {
    /// Whether a retry strategy may re-attempt the operation that raised this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Discovery(_) | RpcError::Transport(_) | RpcError::Io(_)
        )
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for RpcError {
    fn from(err: toml::de::Error) -> Self {
        RpcError::Configuration(err.to_string())
    }
}

impl From<config::ConfigError> for RpcError {
    fn from(err: config::ConfigError) -> Self {
        RpcError::Configuration(err.to_string())
    }
}
