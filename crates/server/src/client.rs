use mtbridge_core::{Command, Response};
use std::time::Duration;
use tracing::{info, warn};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::error::BridgeError;

/// A REQ-socket client for a running bridge.
pub struct BridgeClient {
    socket: ReqSocket,
    endpoint: String,
}

impl BridgeClient {
    /// Connect to a bridge endpoint such as `tcp://127.0.0.1:18812`.
    pub async fn connect(endpoint: &str) -> Result<Self, BridgeError> {
        let mut socket = ReqSocket::new();
        socket.connect(endpoint).await?;
        info!("Connected to bridge at {}", endpoint);
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send a command and wait for its response.
    pub async fn send(&mut self, command: &Command) -> Result<Response, BridgeError> {
        let body = serde_json::to_string(command)?;
        self.send_raw(&body).await
    }

    /// Send a raw JSON body and wait for the response.
    pub async fn send_raw(&mut self, body: &str) -> Result<Response, BridgeError> {
        self.socket.send(ZmqMessage::from(body.to_string())).await?;
        let reply = self.socket.recv().await?;

        let mut bytes = Vec::new();
        for frame in reply.into_vec() {
            bytes.extend_from_slice(&frame);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Check that the bridge answers `ping` within `timeout`.
    pub async fn ping(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.send(&Command::Ping)).await {
            Ok(Ok(response)) if response.success => {
                info!("Bridge ping successful");
                true
            }
            Ok(Ok(response)) => {
                warn!(?response, "Bridge ping failed");
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Bridge ping failed");
                false
            }
            Err(_) => {
                warn!("Bridge ping timed out after {:?}", timeout);
                false
            }
        }
    }

    pub async fn close(self) {
        for e in self.socket.close().await {
            warn!(error = %e, "Error while closing socket");
        }
    }
}
