use async_trait::async_trait;
use chrono::Utc;
use mtbridge_core::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::*;

/// Terminal error codes recorded for link failures.
const IPC_INITIALIZE_FAILED: i32 = -10003;
const IPC_NO_CONNECTION: i32 = -10004;
const IPC_TIMEOUT: i32 = -10005;
const AUTHORIZATION_FAILED: i32 = -6;

/// Configuration for connecting to the MetaTrader 5 terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Host address (e.g. "127.0.0.1").
    pub host: String,
    /// Port the MT5 EA is listening on.
    pub port: u16,
    /// Timeout for establishing the TCP link and reading the greeting.
    pub connect_timeout_secs: u64,
    /// Timeout for a single request/reply exchange.
    pub request_timeout_secs: u64,
    /// Idle time after which the link is probed before the next request.
    pub heartbeat_interval_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5556,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            heartbeat_interval_secs: 10,
        }
    }
}

impl TerminalConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MetaTrader 5 terminal platform.
///
/// Communicates with an MQL5 EA running inside MT5 via TCP socket
/// using length-prefixed JSON messages. Requests are answered in order;
/// replies carry the request id so stale frames can be skipped.
pub struct TerminalPlatform {
    config: TerminalConfig,
    stream: Option<TcpStream>,
    /// Set once `initialize` succeeds; a dropped link is re-established on the next call.
    initialized: bool,
    version: Option<String>,
    last_error: LastError,
    last_activity: Instant,
}

impl TerminalPlatform {
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            config,
            stream: None,
            initialized: false,
            version: None,
            last_error: LastError::none(),
            last_activity: Instant::now(),
        }
    }

    /// EA version reported in the greeting.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn fail(&mut self, code: i32, message: impl Into<String>) -> LastError {
        self.last_error = LastError {
            code,
            message: message.into(),
        };
        self.last_error.clone()
    }

    fn init_error(&mut self, code: i32, message: impl Into<String>) -> PlatformError {
        let LastError { code, message } = self.fail(code, message);
        PlatformError::InitializationFailed { code, message }
    }

    /// Open the TCP link and validate the EA greeting.
    async fn connect(&mut self) -> Result<(), PlatformError> {
        let addr = self.config.address();
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        info!("Connecting to MetaTrader terminal at {}", addr);

        let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(self.init_error(IPC_INITIALIZE_FAILED, format!("TCP connect failed: {}", e)))
            }
            Err(_) => return Err(self.init_error(IPC_TIMEOUT, "TCP connect timed out")),
        };

        let greeting = match tokio::time::timeout(timeout, read_frame(&mut stream)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                return Err(self.init_error(IPC_INITIALIZE_FAILED, format!("Read error: {}", e)))
            }
            Err(_) => return Err(self.init_error(IPC_TIMEOUT, "No greeting from terminal")),
        };

        match serde_json::from_slice::<InboundMessage>(&greeting) {
            Ok(InboundMessage::Connected {
                version,
                logged_in,
                trade_allowed,
            }) => {
                if !logged_in {
                    return Err(self.init_error(
                        AUTHORIZATION_FAILED,
                        "Terminal is not logged into a trading account",
                    ));
                }
                if !trade_allowed {
                    return Err(self.init_error(
                        retcode::CLIENT_DISABLES_AT as i32,
                        "Automated trading is disabled in the terminal",
                    ));
                }
                info!("Connected to MetaTrader EA v{}", version);
                self.version = Some(version);
            }
            Ok(InboundMessage::Error { code, message, .. }) => {
                return Err(self.init_error(code, message));
            }
            Ok(_) => {
                return Err(self.init_error(IPC_INITIALIZE_FAILED, "Unexpected initial message"));
            }
            Err(e) => {
                return Err(self.init_error(
                    IPC_INITIALIZE_FAILED,
                    format!("Deserialization error: {}", e),
                ));
            }
        }

        self.stream = Some(stream);
        self.last_activity = Instant::now();
        self.last_error = LastError::none();
        Ok(())
    }

    /// Drop the link after a transport failure.
    fn disconnect_on(&mut self, message: String) -> PlatformError {
        warn!(error = %message, "Terminal link lost");
        self.stream = None;
        self.fail(IPC_NO_CONNECTION, message.clone());
        PlatformError::ConnectionFailed(message)
    }

    async fn send(&mut self, msg: &OutboundMessage) -> Result<(), PlatformError> {
        let stream = self.stream.as_mut().ok_or(PlatformError::NotConnected)?;
        if let Err(e) = write_frame(stream, msg).await {
            return Err(self.disconnect_on(format!("Write error: {}", e)));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<InboundMessage, PlatformError> {
        let stream = self.stream.as_mut().ok_or(PlatformError::NotConnected)?;
        let body = match read_frame(stream).await {
            Ok(body) => body,
            Err(e) => return Err(self.disconnect_on(format!("Read error: {}", e))),
        };
        self.last_activity = Instant::now();
        serde_json::from_slice(&body)
            .map_err(|e| PlatformError::Protocol(format!("Deserialization error: {}", e)))
    }

    /// Read frames until the reply to `id` arrives, skipping anything else.
    async fn recv_reply(&mut self, id: &str) -> Result<InboundMessage, PlatformError> {
        loop {
            let msg = self.recv().await?;
            let is_reply = match msg.request_id() {
                Some(reply_id) => reply_id == id,
                None => matches!(msg, InboundMessage::Error { .. }),
            };
            if is_reply {
                return Ok(msg);
            }
            debug!(?msg, "Skipping unrelated terminal frame");
        }
    }

    /// Make sure a live link exists, reconnecting or probing as needed.
    async fn ensure_link(&mut self) -> Result<(), PlatformError> {
        if !self.initialized {
            return Err(PlatformError::NotConnected);
        }
        if self.stream.is_none() {
            info!("Re-establishing terminal link");
            return self.connect().await;
        }
        let idle = Duration::from_secs(self.config.heartbeat_interval_secs);
        if self.last_activity.elapsed() >= idle {
            self.heartbeat().await?;
        }
        Ok(())
    }

    /// Probe the link and wait for the acknowledgement.
    async fn heartbeat(&mut self) -> Result<(), PlatformError> {
        self.send(&OutboundMessage::Heartbeat {
            timestamp: Utc::now(),
        })
        .await?;
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let ack = tokio::time::timeout(timeout, async {
            loop {
                if let InboundMessage::HeartbeatAck { .. } = self.recv().await? {
                    return Ok::<(), PlatformError>(());
                }
            }
        })
        .await;
        match ack {
            Ok(result) => result,
            Err(_) => Err(self.disconnect_on("Heartbeat timed out".to_string())),
        }
    }

    /// Send one request and wait for its reply.
    async fn request(&mut self, msg: OutboundMessage, id: &str) -> Result<InboundMessage, PlatformError> {
        self.ensure_link().await?;
        self.send(&msg).await?;

        let secs = self.config.request_timeout_secs;
        let reply = match tokio::time::timeout(Duration::from_secs(secs), self.recv_reply(id)).await {
            Ok(reply) => reply?,
            Err(_) => {
                // A partially read frame leaves the stream mid-body.
                warn!(timeout_secs = secs, "Terminal request timed out; dropping link");
                self.stream = None;
                self.fail(IPC_TIMEOUT, "Request timed out");
                return Err(PlatformError::Timeout(secs));
            }
        };

        if let InboundMessage::Error { code, message, .. } = reply {
            self.fail(code, message.clone());
            return Err(PlatformError::Terminal { code, message });
        }
        Ok(reply)
    }
}

fn unexpected(msg: InboundMessage) -> PlatformError {
    PlatformError::Protocol(format!("Unexpected reply: {:?}", msg))
}

fn next_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl Platform for TerminalPlatform {
    async fn initialize(&mut self) -> Result<(), PlatformError> {
        self.connect().await?;
        self.initialized = true;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            info!("Disconnected from MetaTrader terminal");
        }
        self.initialized = false;
    }

    fn last_error(&self) -> LastError {
        self.last_error.clone()
    }

    async fn account_info(&mut self) -> Result<Option<AccountInfo>, PlatformError> {
        let id = next_id();
        match self
            .request(OutboundMessage::AccountInfo { id: id.clone() }, &id)
            .await?
        {
            InboundMessage::AccountInfo { account, .. } => Ok(account),
            other => Err(unexpected(other)),
        }
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, PlatformError> {
        let id = next_id();
        let msg = OutboundMessage::SymbolInfo {
            id: id.clone(),
            symbol: symbol.to_string(),
        };
        match self.request(msg, &id).await? {
            InboundMessage::SymbolInfo { symbol, .. } => Ok(symbol),
            other => Err(unexpected(other)),
        }
    }

    async fn positions_get(&mut self, ticket: u64) -> Result<Vec<PositionInfo>, PlatformError> {
        let id = next_id();
        let msg = OutboundMessage::PositionsGet {
            id: id.clone(),
            ticket,
        };
        match self.request(msg, &id).await? {
            InboundMessage::Positions { positions, .. } => Ok(positions),
            other => Err(unexpected(other)),
        }
    }

    async fn order_send(&mut self, request: &TradeRequest) -> Result<OrderSendResult, PlatformError> {
        let id = next_id();
        let msg = OutboundMessage::OrderSend {
            id: id.clone(),
            request: request.clone(),
        };
        match self.request(msg, &id).await? {
            InboundMessage::OrderResult { result, .. } => Ok(result),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    /// Start a fake EA that greets with `greeting` and answers each request with `reply(request)`.
    async fn fake_terminal<F>(greeting: Value, reply: F) -> TerminalConfig
    where
        F: Fn(&Value) -> Vec<Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            write_frame(&mut socket, &greeting).await.unwrap();
            while let Ok(body) = read_frame(&mut socket).await {
                let request: Value = serde_json::from_slice(&body).unwrap();
                for frame in reply(&request) {
                    write_frame(&mut socket, &frame).await.unwrap();
                }
            }
        });
        TerminalConfig {
            port,
            connect_timeout_secs: 2,
            request_timeout_secs: 2,
            heartbeat_interval_secs: 3600,
            ..Default::default()
        }
    }

    fn ready() -> Value {
        json!({"type": "connected", "version": "1.2", "logged_in": true, "trade_allowed": true})
    }

    #[tokio::test]
    async fn test_initialize_reads_greeting() {
        let config = fake_terminal(ready(), |_| vec![]).await;
        let mut platform = TerminalPlatform::new(config);
        platform.initialize().await.unwrap();
        assert_eq!(platform.version(), Some("1.2"));
        platform.shutdown().await;
        platform.shutdown().await;
    }

    #[tokio::test]
    async fn test_initialize_fails_when_autotrading_disabled() {
        let greeting =
            json!({"type": "connected", "version": "1.2", "logged_in": true, "trade_allowed": false});
        let config = fake_terminal(greeting, |_| vec![]).await;
        let mut platform = TerminalPlatform::new(config);
        let err = platform.initialize().await.unwrap_err();
        assert!(matches!(err, PlatformError::InitializationFailed { code: 10027, .. }));
        assert_eq!(platform.last_error().code, 10027);
    }

    #[tokio::test]
    async fn test_initialize_fails_when_not_logged_in() {
        let greeting = json!({"type": "connected", "version": "1.2", "logged_in": false});
        let config = fake_terminal(greeting, |_| vec![]).await;
        let mut platform = TerminalPlatform::new(config);
        let err = platform.initialize().await.unwrap_err();
        assert!(matches!(err, PlatformError::InitializationFailed { code: -6, .. }));
    }

    #[tokio::test]
    async fn test_initialize_fails_without_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut platform = TerminalPlatform::new(TerminalConfig {
            port,
            connect_timeout_secs: 1,
            ..Default::default()
        });
        let err = platform.initialize().await.unwrap_err();
        assert!(matches!(err, PlatformError::InitializationFailed { .. }));
        assert_eq!(platform.last_error().code, IPC_INITIALIZE_FAILED);
    }

    #[tokio::test]
    async fn test_calls_before_initialize_are_rejected() {
        let mut platform = TerminalPlatform::new(TerminalConfig::default());
        assert!(matches!(
            platform.account_info().await,
            Err(PlatformError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_symbol_info_skips_stale_frames() {
        let config = fake_terminal(ready(), |request| {
            let id = request["id"].clone();
            vec![
                json!({"type": "symbol_info", "id": "stale", "symbol": null}),
                json!({"type": "heartbeat_ack", "timestamp": "2026-01-01T00:00:00Z"}),
                json!({"type": "symbol_info", "id": id, "symbol": {
                    "name": request["symbol"], "bid": 1.095, "ask": 1.0952, "point": 0.00001,
                    "digits": 5, "spread": 20, "volume_min": 0.01, "volume_max": 100.0,
                    "volume_step": 0.01
                }}),
            ]
        })
        .await;
        let mut platform = TerminalPlatform::new(config);
        platform.initialize().await.unwrap();

        let info = platform.symbol_info("EURUSD").await.unwrap().unwrap();
        assert_eq!(info.name, "EURUSD");
        assert_eq!(info.digits, 5);
        assert_eq!(info.bid, 1.095);
    }

    #[tokio::test]
    async fn test_order_send_forwards_request() {
        let config = fake_terminal(ready(), |request| {
            assert_eq!(request["type"], "order_send");
            assert_eq!(request["request"]["action"], 1);
            assert_eq!(request["request"]["type_filling"], 1);
            vec![json!({"type": "order_result", "id": request["id"], "result": {
                "retcode": 10009, "order": 77, "deal": 78, "volume": 0.1, "price": 1.0952,
                "comment": "Request executed"
            }})]
        })
        .await;
        let mut platform = TerminalPlatform::new(config);
        platform.initialize().await.unwrap();

        let result = platform
            .order_send(&TradeRequest::deal("EURUSD", Side::Buy, 0.1))
            .await
            .unwrap();
        assert!(result.is_done());
        assert_eq!(result.order, 77);
    }

    #[tokio::test]
    async fn test_terminal_error_frame_recorded() {
        let config = fake_terminal(ready(), |request| {
            vec![json!({"type": "error", "id": request["id"], "code": -2, "message": "Invalid params"})]
        })
        .await;
        let mut platform = TerminalPlatform::new(config);
        platform.initialize().await.unwrap();

        let err = platform.positions_get(1).await.unwrap_err();
        assert!(matches!(err, PlatformError::Terminal { code: -2, .. }));
        assert_eq!(platform.last_error().message, "Invalid params");
    }

    #[tokio::test]
    async fn test_idle_link_is_probed_with_heartbeat() {
        let config = fake_terminal(ready(), |request| match request["type"].as_str() {
            Some("heartbeat") => {
                vec![json!({"type": "heartbeat_ack", "timestamp": request["timestamp"]})]
            }
            _ => vec![json!({"type": "positions", "id": request["id"], "positions": []})],
        })
        .await;
        let mut platform = TerminalPlatform::new(TerminalConfig {
            heartbeat_interval_secs: 0,
            ..config
        });
        platform.initialize().await.unwrap();

        assert!(platform.positions_get(5).await.unwrap().is_empty());
        assert!(platform.positions_get(6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_frames_are_skipped() {
        let config = fake_terminal(ready(), |request| {
            vec![
                json!({"type": "tick", "symbol": "EURUSD", "bid": 1.1}),
                json!({"type": "positions", "id": request["id"], "positions": []}),
            ]
        })
        .await;
        let mut platform = TerminalPlatform::new(config);
        platform.initialize().await.unwrap();

        assert!(platform.positions_get(9).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let config = fake_terminal(ready(), |_| vec![]).await;
        let mut platform = TerminalPlatform::new(TerminalConfig {
            request_timeout_secs: 1,
            ..config
        });
        platform.initialize().await.unwrap();

        let err = platform.account_info().await.unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(1)));
        assert_eq!(platform.last_error().code, IPC_TIMEOUT);
    }

    #[tokio::test]
    async fn test_timeout_mid_frame_relinks_on_next_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            // First link: the reply is split across the request timeout.
            let (mut socket, _) = listener.accept().await.unwrap();
            write_frame(&mut socket, &ready()).await.unwrap();
            let body = read_frame(&mut socket).await.unwrap();
            let request: Value = serde_json::from_slice(&body).unwrap();
            let reply = json!({"type": "positions", "id": request["id"], "positions": []});
            let framed = frame_message(reply.to_string().as_bytes());
            socket.write_all(&framed[..20]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = socket.write_all(&framed[20..]).await;

            // Second link answers promptly.
            let (mut socket, _) = listener.accept().await.unwrap();
            write_frame(&mut socket, &ready()).await.unwrap();
            while let Ok(body) = read_frame(&mut socket).await {
                let request: Value = serde_json::from_slice(&body).unwrap();
                let reply = json!({"type": "positions", "id": request["id"], "positions": []});
                write_frame(&mut socket, &reply).await.unwrap();
            }
        });

        let mut platform = TerminalPlatform::new(TerminalConfig {
            port,
            connect_timeout_secs: 5,
            request_timeout_secs: 1,
            heartbeat_interval_secs: 3600,
            ..Default::default()
        });
        platform.initialize().await.unwrap();

        let err = platform.positions_get(1).await.unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(1)));

        assert!(platform.positions_get(2).await.unwrap().is_empty());
        assert_eq!(platform.last_error(), LastError::none());
    }
}
