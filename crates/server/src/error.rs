use mtbridge_core::{LastError, PlatformError};

/// Errors that end the bridge or a client exchange.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("Account info unavailable after initialization: {0}")]
    AccountUnavailable(LastError),
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: zeromq::ZmqError,
    },
    #[error("Socket error: {0}")]
    Socket(#[from] zeromq::ZmqError),
    #[error("Bridge socket is not bound")]
    NotBound,
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}
