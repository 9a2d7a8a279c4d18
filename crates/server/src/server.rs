use futures_util::FutureExt;
use mtbridge_core::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};
use zeromq::{Endpoint, RepSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::error::BridgeError;
use crate::handlers::dispatch;

/// Sent when a response cannot be encoded.
const ENCODE_FAILURE: &str = r#"{"success":false,"error":"Failed to encode response"}"#;

/// Where the bridge listens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Interface to bind ("0.0.0.0" for all).
    pub bind_address: String,
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 18812,
        }
    }
}

impl BridgeConfig {
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.bind_address, self.port)
    }
}

/// Lifecycle of the bridge loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Stopped,
    Running,
}

/// Owns the platform connection and the reply socket.
///
/// `open` connects the platform, `bind` starts listening, `serve_until`
/// answers requests until shutdown and then releases everything. `run`
/// performs all three.
pub struct BridgeServer<P: Platform> {
    config: BridgeConfig,
    platform: P,
    socket: Option<RepSocket>,
    state: BridgeState,
    closed: bool,
}

impl<P: Platform> BridgeServer<P> {
    pub fn new(config: BridgeConfig, platform: P) -> Self {
        Self {
            config,
            platform,
            socket: None,
            state: BridgeState::Stopped,
            closed: false,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Initialize the platform and confirm an account is reachable.
    pub async fn open(&mut self) -> Result<AccountInfo, BridgeError> {
        if let Err(e) = self.platform.initialize().await {
            let last = self.platform.last_error();
            error!(code = last.code, "Platform initialization failed. Error code: {}", last);
            error!("Make sure MetaTrader 5 is installed, running, and logged into an account");
            error!("Also ensure 'Allow automated trading' is enabled in MT5 settings");
            return Err(e.into());
        }

        let account = match self.platform.account_info().await {
            Ok(Some(account)) => account,
            Ok(None) | Err(_) => {
                let last = self.platform.last_error();
                error!(code = last.code, "Failed to get account info. Error code: {}", last);
                error!("Make sure you are logged into a trading account in MT5");
                self.platform.shutdown().await;
                return Err(BridgeError::AccountUnavailable(last));
            }
        };

        info!("Successfully connected to MT5 account: {}", account.login);
        info!("Account balance: {} {}", account.balance, account.currency);
        Ok(account)
    }

    /// Bind the reply socket. Returns the resolved endpoint.
    pub async fn bind(&mut self) -> Result<Endpoint, BridgeError> {
        let endpoint = self.config.endpoint();
        let mut socket = RepSocket::new();
        let bound = socket
            .bind(&endpoint)
            .await
            .map_err(|source| BridgeError::Bind {
                endpoint: endpoint.clone(),
                source,
            })?;

        self.socket = Some(socket);
        self.state = BridgeState::Running;
        info!(endpoint = %bound, "Bridge started on port {}", self.config.port);
        Ok(bound)
    }

    /// Answer requests until `shutdown` resolves or the socket fails.
    async fn serve<F>(&mut self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let socket = self.socket.as_mut().ok_or(BridgeError::NotBound)?;
        tokio::pin!(shutdown);

        loop {
            let message = tokio::select! {
                _ = &mut shutdown => {
                    info!("Bridge stopped by shutdown signal");
                    return Ok(());
                }
                received = socket.recv() => received?,
            };

            let response = handle_request(&mut self.platform, &message_body(message)).await;
            let encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
                error!(error = %e, "Failed to encode response");
                ENCODE_FAILURE.to_string()
            });
            socket.send(ZmqMessage::from(encoded.clone())).await?;
            info!(response = %encoded, "Sent response");
        }
    }

    /// Serve until shutdown, then release the socket and the platform.
    pub async fn serve_until<F>(mut self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let result = self.serve(shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "Bridge error");
        }
        self.close().await;
        result
    }

    /// Open the platform, bind, and serve until shutdown.
    ///
    /// Nothing is bound if the platform cannot be opened.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        self.open().await?;
        if let Err(e) = self.bind().await {
            error!(error = %e, "Bridge error");
            self.close().await;
            return Err(e);
        }
        self.serve_until(shutdown).await
    }

    /// Release the socket and shut the platform down. Runs at most once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state = BridgeState::Stopped;

        if let Some(socket) = self.socket.take() {
            for e in socket.close().await {
                warn!(error = %e, "Error while closing socket");
            }
        }
        self.platform.shutdown().await;
        info!("Bridge shutdown complete");
    }
}

fn message_body(message: ZmqMessage) -> Vec<u8> {
    let mut body = Vec::new();
    for frame in message.into_vec() {
        body.extend_from_slice(&frame);
    }
    body
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Internal error".to_string()
    }
}

/// Decode, dispatch and wrap one request body.
///
/// Never fails: decode errors, handler failures and handler panics all
/// become failure responses.
pub async fn handle_request<P: Platform + ?Sized>(platform: &mut P, body: &[u8]) -> Response {
    info!(request = %String::from_utf8_lossy(body), "Received request");

    let command = match Command::parse(body) {
        Ok(command) => command,
        Err(failure) => {
            warn!(error = %failure, "Rejected request");
            return failure.into();
        }
    };

    let action = command.action();
    let outcome = AssertUnwindSafe(dispatch(platform, command))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(action, error = %message, "Error processing request");
            Err(Failure::new(message))
        });

    if let Err(failure) = &outcome {
        warn!(action, error = %failure.error, retcode = ?failure.retcode, "Request failed");
    }
    outcome.into()
}
