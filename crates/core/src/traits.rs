use crate::models::*;
use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Platform Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while talking to the trading platform.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Platform initialization failed ({code}): {message}")]
    InitializationFailed { code: i32, message: String },
    #[error("Not connected to the platform")]
    NotConnected,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Platform request timed out after {0}s")]
    Timeout(u64),
    #[error("Terminal error ({code}): {message}")]
    Terminal { code: i32, message: String },
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// The last error reported by the platform, in the terminal's own terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub code: i32,
    pub message: String,
}

impl LastError {
    pub fn none() -> Self {
        Self {
            code: 1,
            message: "Success".to_string(),
        }
    }
}

impl std::fmt::Display for LastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, '{}')", self.code, self.message)
    }
}

/// A trading platform the bridge calls through to.
///
/// Lookups return `Ok(None)` (or an empty list) when the entity does not
/// exist; `Err` is reserved for failures reaching the platform at all.
#[async_trait]
pub trait Platform: Send {
    /// Open the platform connection. Fails if the terminal is not running,
    /// not logged in, or automated trading is disabled.
    async fn initialize(&mut self) -> Result<(), PlatformError>;

    /// Close the platform connection. Safe to call more than once.
    async fn shutdown(&mut self);

    /// The most recent error the platform reported.
    fn last_error(&self) -> LastError;

    /// Current account snapshot.
    async fn account_info(&mut self) -> Result<Option<AccountInfo>, PlatformError>;

    /// Metadata and quote for a symbol.
    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, PlatformError>;

    /// Open positions with the given ticket.
    async fn positions_get(&mut self, ticket: u64) -> Result<Vec<PositionInfo>, PlatformError>;

    /// Submit a trade request.
    async fn order_send(&mut self, request: &TradeRequest) -> Result<OrderSendResult, PlatformError>;
}

#[async_trait]
impl<P: Platform + ?Sized> Platform for Box<P> {
    async fn initialize(&mut self) -> Result<(), PlatformError> {
        (**self).initialize().await
    }

    async fn shutdown(&mut self) {
        (**self).shutdown().await
    }

    fn last_error(&self) -> LastError {
        (**self).last_error()
    }

    async fn account_info(&mut self) -> Result<Option<AccountInfo>, PlatformError> {
        (**self).account_info().await
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, PlatformError> {
        (**self).symbol_info(symbol).await
    }

    async fn positions_get(&mut self, ticket: u64) -> Result<Vec<PositionInfo>, PlatformError> {
        (**self).positions_get(ticket).await
    }

    async fn order_send(&mut self, request: &TradeRequest) -> Result<OrderSendResult, PlatformError> {
        (**self).order_send(request).await
    }
}
