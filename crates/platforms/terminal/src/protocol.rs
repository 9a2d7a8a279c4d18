use chrono::{DateTime, Utc};
use mtbridge_core::{AccountInfo, OrderSendResult, PositionInfo, SymbolInfo, TradeRequest};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body accepted from the terminal.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Messages sent from the bridge TO the terminal EA.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// Request the current account snapshot.
    #[serde(rename = "account_info")]
    AccountInfo { id: String },
    /// Request symbol metadata and quote.
    #[serde(rename = "symbol_info")]
    SymbolInfo { id: String, symbol: String },
    /// Request open positions by ticket.
    #[serde(rename = "positions_get")]
    PositionsGet { id: String, ticket: u64 },
    /// Submit a trade request.
    #[serde(rename = "order_send")]
    OrderSend { id: String, request: TradeRequest },
    /// Liveness probe.
    #[serde(rename = "heartbeat")]
    Heartbeat { timestamp: DateTime<Utc> },
}

/// Messages received FROM the terminal EA.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// First frame after connecting.
    #[serde(rename = "connected")]
    Connected {
        version: String,
        #[serde(default)]
        logged_in: bool,
        #[serde(default)]
        trade_allowed: bool,
    },
    #[serde(rename = "account_info")]
    AccountInfo {
        id: String,
        account: Option<AccountInfo>,
    },
    #[serde(rename = "symbol_info")]
    SymbolInfo {
        id: String,
        symbol: Option<SymbolInfo>,
    },
    #[serde(rename = "positions")]
    Positions {
        id: String,
        #[serde(default)]
        positions: Vec<PositionInfo>,
    },
    #[serde(rename = "order_result")]
    OrderResult { id: String, result: OrderSendResult },
    /// Heartbeat acknowledgement.
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck { timestamp: DateTime<Utc> },
    /// Error, either for a specific request or for the link as a whole.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        id: Option<String>,
        code: i32,
        message: String,
    },
    /// Any frame type this bridge does not know, such as newer EA push messages.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// The request this message answers, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            InboundMessage::AccountInfo { id, .. }
            | InboundMessage::SymbolInfo { id, .. }
            | InboundMessage::Positions { id, .. }
            | InboundMessage::OrderResult { id, .. } => Some(id),
            InboundMessage::Error { id, .. } => id.as_deref(),
            InboundMessage::Connected { .. }
            | InboundMessage::HeartbeatAck { .. }
            | InboundMessage::Unknown => None,
        }
    }
}

/// Frame a message with a 4-byte length prefix (big-endian).
pub fn frame_message(msg: &[u8]) -> Vec<u8> {
    let len = msg.len() as u32;
    let mut framed = Vec::with_capacity(4 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    framed
}

/// Serialize and write one framed message.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_vec(msg)?;
    writer.write_all(&frame_message(&json)).await?;
    writer.flush().await
}

/// Read one framed message body.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_prefix_is_big_endian_length() {
        let framed = frame_message(b"{}");
        assert_eq!(framed, vec![0, 0, 0, 2, b'{', b'}']);
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = OutboundMessage::SymbolInfo {
            id: "r1".to_string(),
            symbol: "EURUSD".to_string(),
        };
        write_frame(&mut a, &msg).await.unwrap();

        let body = read_frame(&mut b).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "symbol_info");
        assert_eq!(value["symbol"], "EURUSD");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_inbound_error_without_id() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"error","code":-2,"message":"bad"}"#).unwrap();
        assert_eq!(msg.request_id(), None);
        let msg: InboundMessage = serde_json::from_str(
            r#"{"type":"symbol_info","id":"abc","symbol":null}"#,
        )
        .unwrap();
        assert_eq!(msg.request_id(), Some("abc"));
    }

    #[test]
    fn test_unknown_frame_type_decodes() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"type":"tick","symbol":"EURUSD","bid":1.1}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Unknown));
        assert_eq!(msg.request_id(), None);
    }
}
