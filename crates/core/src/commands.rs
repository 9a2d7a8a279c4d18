use crate::models::*;
use crate::traits::PlatformError;
use serde::{Deserialize, Serialize};

/// Action tags the bridge understands.
pub const ACTIONS: &[&str] = &[
    "ping",
    "trade",
    "modify_position",
    "get_account_info",
    "get_symbol_info",
];

/// Comment attached to trades that do not carry one.
pub const DEFAULT_TRADE_COMMENT: &str = "Bot Trade";

/// Volume used when a trade does not specify one.
pub const DEFAULT_TRADE_VOLUME: f64 = 0.1;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A decoded bridge request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Ping,
    Trade {
        #[serde(default)]
        request: TradeParams,
    },
    ModifyPosition {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ticket: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sl: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tp: Option<f64>,
    },
    GetAccountInfo,
    GetSymbolInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
}

/// Payload of a `trade` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(rename = "action", default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Command {
    /// Decode a raw request body.
    ///
    /// The action tag is checked before the payload so that unknown actions
    /// are reported by name rather than as a deserialization error.
    pub fn parse(body: &[u8]) -> Result<Command, Failure> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| Failure::new(format!("Invalid JSON: {}", e)))?;

        let action = match value.get("action").and_then(|a| a.as_str()) {
            Some(action) => action.to_string(),
            None => return Err(Failure::new("Missing action")),
        };
        if !ACTIONS.contains(&action.as_str()) {
            return Err(Failure::new(format!("Unknown action: {}", action)));
        }

        serde_json::from_value(value)
            .map_err(|e| Failure::new(format!("Invalid {} request: {}", action, e)))
    }

    /// The wire tag of this command.
    pub fn action(&self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Trade { .. } => "trade",
            Command::ModifyPosition { .. } => "modify_position",
            Command::GetAccountInfo => "get_account_info",
            Command::GetSymbolInfo { .. } => "get_symbol_info",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Account fields exposed to bridge clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub login: u64,
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub currency: String,
}

impl From<&AccountInfo> for AccountSummary {
    fn from(info: &AccountInfo) -> Self {
        Self {
            login: info.login,
            balance: info.balance,
            equity: info.equity,
            margin: info.margin,
            free_margin: info.margin_free,
            currency: info.currency.clone(),
        }
    }
}

/// Symbol fields exposed to bridge clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSummary {
    pub name: String,
    pub bid: f64,
    pub ask: f64,
    pub point: f64,
    pub digits: u32,
    pub spread: i64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
}

impl From<&SymbolInfo> for SymbolSummary {
    fn from(info: &SymbolInfo) -> Self {
        Self {
            name: info.name.clone(),
            bid: info.bid,
            ask: info.ask,
            point: info.point,
            digits: info.digits,
            spread: info.spread,
            volume_min: info.volume_min,
            volume_max: info.volume_max,
            volume_step: info.volume_step,
        }
    }
}

/// Success payload of a handled command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// An executed trade.
    Trade { ticket: u64, price: f64, volume: f64 },
    /// A modified position.
    Position { ticket: u64 },
    Account { account: AccountSummary },
    Symbol { symbol: SymbolSummary },
    Message { message: String },
}

impl Reply {
    pub fn pong() -> Self {
        Reply::Message {
            message: "pong".to_string(),
        }
    }
}

/// Failure payload: a message and, for platform rejections, its return code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}")]
pub struct Failure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retcode: Option<u32>,
}

impl Failure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retcode: None,
        }
    }

    pub fn rejected(error: impl Into<String>, retcode: u32) -> Self {
        Self {
            error: error.into(),
            retcode: Some(retcode),
        }
    }
}

impl From<PlatformError> for Failure {
    fn from(err: PlatformError) -> Self {
        Failure::new(err.to_string())
    }
}

/// Result of handling one command.
pub type Outcome = Result<Reply, Failure>;

/// The JSON envelope sent back for every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(flatten)]
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Failure(Failure),
    Reply(Reply),
}

impl Response {
    pub fn failure(error: impl Into<String>) -> Self {
        Failure::new(error).into()
    }

    pub fn into_outcome(self) -> Outcome {
        match self.body {
            ResponseBody::Reply(reply) if self.success => Ok(reply),
            ResponseBody::Reply(_) => Err(Failure::new("Unsuccessful response without error")),
            ResponseBody::Failure(failure) => Err(failure),
        }
    }
}

impl From<Failure> for Response {
    fn from(failure: Failure) -> Self {
        Self {
            success: false,
            body: ResponseBody::Failure(failure),
        }
    }
}

impl From<Outcome> for Response {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(reply) => Self {
                success: true,
                body: ResponseBody::Reply(reply),
            },
            Err(failure) => failure.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_trade_with_nested_request() {
        let body = br#"{"action":"trade","request":{"symbol":"EURUSD","action":"BUY","sl":0,"comment":"x"}}"#;
        let command = Command::parse(body).unwrap();
        match command {
            Command::Trade { request } => {
                assert_eq!(request.symbol.as_deref(), Some("EURUSD"));
                assert_eq!(request.side, Some(Side::Buy));
                assert_eq!(request.volume, None);
                assert_eq!(request.sl, Some(0.0));
                assert_eq!(request.tp, None);
            }
            other => panic!("Expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_trade_without_request_is_empty() {
        let command = Command::parse(br#"{"action":"trade"}"#).unwrap();
        assert_eq!(
            command,
            Command::Trade {
                request: TradeParams::default()
            }
        );
    }

    #[test]
    fn test_parse_unknown_action() {
        let failure = Command::parse(br#"{"action":"close_all"}"#).unwrap_err();
        assert_eq!(failure.error, "Unknown action: close_all");
        assert_eq!(failure.retcode, None);
    }

    #[test]
    fn test_parse_missing_action_and_bad_json() {
        assert_eq!(
            Command::parse(br#"{"symbol":"EURUSD"}"#).unwrap_err().error,
            "Missing action"
        );
        assert!(Command::parse(b"{not json")
            .unwrap_err()
            .error
            .starts_with("Invalid JSON"));
    }

    #[test]
    fn test_parse_bad_payload_names_action() {
        let failure =
            Command::parse(br#"{"action":"trade","request":{"action":"HOLD"}}"#).unwrap_err();
        assert!(failure.error.starts_with("Invalid trade request"));
    }

    #[test]
    fn test_ping_ignores_extra_fields() {
        let command = Command::parse(br#"{"action":"ping","id":7}"#).unwrap();
        assert_eq!(command, Command::Ping);
        assert_eq!(command.action(), "ping");
    }

    #[test]
    fn test_response_envelopes() {
        let pong = serde_json::to_value(Response::from(Ok(Reply::pong()))).unwrap();
        assert_eq!(pong, json!({"success": true, "message": "pong"}));

        let rejected: Response = Failure::rejected("Order failed: No money", 10019).into();
        assert_eq!(
            serde_json::to_value(&rejected).unwrap(),
            json!({"success": false, "error": "Order failed: No money", "retcode": 10019})
        );

        let missing = serde_json::to_value(Response::failure("Position not found")).unwrap();
        assert_eq!(missing, json!({"success": false, "error": "Position not found"}));
    }

    #[test]
    fn test_response_decodes_to_outcome() {
        let response: Response = serde_json::from_value(
            json!({"success": true, "ticket": 5, "price": 1.1, "volume": 0.1}),
        )
        .unwrap();
        assert_eq!(
            response.into_outcome(),
            Ok(Reply::Trade {
                ticket: 5,
                price: 1.1,
                volume: 0.1
            })
        );

        let response: Response =
            serde_json::from_value(json!({"success": false, "error": "Symbol X not found"}))
                .unwrap();
        assert_eq!(
            response.into_outcome(),
            Err(Failure::new("Symbol X not found"))
        );
    }
}
