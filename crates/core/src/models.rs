use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trade return codes
// ---------------------------------------------------------------------------

/// Trade server return codes reported by the terminal for `order_send`.
pub mod retcode {
    pub const REQUOTE: u32 = 10004;
    pub const REJECT: u32 = 10006;
    pub const CANCEL: u32 = 10007;
    pub const PLACED: u32 = 10008;
    /// Request completed.
    pub const DONE: u32 = 10009;
    pub const ERROR: u32 = 10011;
    pub const TIMEOUT: u32 = 10012;
    pub const INVALID: u32 = 10013;
    pub const INVALID_VOLUME: u32 = 10014;
    pub const INVALID_PRICE: u32 = 10015;
    pub const INVALID_STOPS: u32 = 10016;
    pub const TRADE_DISABLED: u32 = 10017;
    pub const MARKET_CLOSED: u32 = 10018;
    pub const NO_MONEY: u32 = 10019;
    pub const PRICE_CHANGED: u32 = 10020;
    pub const INVALID_FILL: u32 = 10030;
    /// Autotrading disabled by the client terminal.
    pub const CLIENT_DISABLES_AT: u32 = 10027;
    pub const POSITION_CLOSED: u32 = 10036;
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Error raised when a numeric terminal code has no matching variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: u32,
}

/// Declares a terminal enumeration that travels as its numeric code.
macro_rules! terminal_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal { $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u32", try_from = "u32")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn code(self) -> u32 {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.code()
            }
        }

        impl TryFrom<u32> for $name {
            type Error = UnknownCode;

            fn try_from(code: u32) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    _ => Err(UnknownCode { kind: $kind, code }),
                }
            }
        }
    };
}

terminal_enum! {
    /// The kind of operation a trade request performs.
    TradeAction, "trade action" {
        /// Place a market order for immediate execution.
        Deal = 1,
        /// Modify stop-loss / take-profit of an open position.
        Sltp = 6,
    }
}

terminal_enum! {
    /// Order type.
    OrderType, "order type" {
        Buy = 0,
        Sell = 1,
    }
}

terminal_enum! {
    /// Fill policy.
    OrderFilling, "filling" {
        /// Immediate-or-cancel.
        Ioc = 1,
    }
}

terminal_enum! {
    /// Order lifetime.
    OrderTime, "order time" {
        /// Good-till-cancelled.
        Gtc = 0,
    }
}

terminal_enum! {
    /// Direction of an open position.
    PositionType, "position type" {
        Buy = 0,
        Sell = 1,
    }
}

/// Order side as expressed by bridge clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The market order type that opens a position on this side.
    pub fn order_type(&self) -> OrderType {
        match self {
            Side::Buy => OrderType::Buy,
            Side::Sell => OrderType::Sell,
        }
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Snapshot of the trading account as reported by the terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub balance: f64,
    pub equity: f64,
    /// Margin currently used by open positions.
    pub margin: f64,
    pub margin_free: f64,
    pub currency: String,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub trade_allowed: bool,
}

// ---------------------------------------------------------------------------
// Symbol
// ---------------------------------------------------------------------------

/// Instrument metadata and current quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub bid: f64,
    pub ask: f64,
    /// Minimum price change.
    pub point: f64,
    /// Number of decimal places in a quote.
    pub digits: u32,
    /// Spread in points.
    pub spread: i64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    #[serde(default)]
    pub description: String,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// An open position held by the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub ticket: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub position_type: PositionType,
    pub volume: f64,
    pub price_open: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub tp: f64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Trade requests
// ---------------------------------------------------------------------------

/// A request submitted through `order_send`.
///
/// Optional prices are sent only when present; `Some(0.0)` is an explicit
/// zero and is forwarded as such.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub action: TradeAction,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tp: Option<f64>,
    /// Ticket of the position being modified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_time: Option<OrderTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_filling: Option<OrderFilling>,
}

impl TradeRequest {
    /// A market deal on `symbol`, good-till-cancelled with immediate-or-cancel fill.
    pub fn deal(symbol: &str, side: Side, volume: f64) -> Self {
        Self {
            action: TradeAction::Deal,
            symbol: symbol.to_string(),
            volume: Some(volume),
            order_type: Some(side.order_type()),
            price: None,
            sl: None,
            tp: None,
            position: None,
            comment: None,
            type_time: Some(OrderTime::Gtc),
            type_filling: Some(OrderFilling::Ioc),
        }
    }

    /// A stop-loss / take-profit change on an open position.
    pub fn sltp(position: u64, symbol: &str) -> Self {
        Self {
            action: TradeAction::Sltp,
            symbol: symbol.to_string(),
            volume: None,
            order_type: None,
            price: None,
            sl: None,
            tp: None,
            position: Some(position),
            comment: None,
            type_time: None,
            type_filling: None,
        }
    }
}

/// The terminal's answer to `order_send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSendResult {
    pub retcode: u32,
    /// Deal ticket, if a deal was performed.
    #[serde(default)]
    pub deal: u64,
    /// Order ticket, if an order was placed.
    #[serde(default)]
    pub order: u64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub request_id: u32,
}

impl OrderSendResult {
    pub fn is_done(&self) -> bool {
        self.retcode == retcode::DONE
    }

    /// A result carrying only a return code and comment.
    pub fn rejected(retcode: u32, comment: impl Into<String>) -> Self {
        Self {
            retcode,
            deal: 0,
            order: 0,
            volume: 0.0,
            price: 0.0,
            bid: 0.0,
            ask: 0.0,
            comment: comment.into(),
            request_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enums_travel_as_codes() {
        let request = TradeRequest::deal("EURUSD", Side::Sell, 0.1);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["action"], 1);
        assert_eq!(json["type"], 1);
        assert_eq!(json["type_time"], 0);
        assert_eq!(json["type_filling"], 1);
        assert!(json.get("price").is_none());
        assert!(json.get("position").is_none());
    }

    #[test]
    fn test_explicit_zero_stop_is_serialized() {
        let mut request = TradeRequest::sltp(42, "EURUSD");
        request.sl = Some(0.0);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["action"], 6);
        assert_eq!(json["position"], 42);
        assert_eq!(json["sl"], 0.0);
        assert!(json.get("tp").is_none());
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        let err = TradeAction::try_from(99).unwrap_err();
        assert_eq!(err.code, 99);
        assert!(serde_json::from_str::<OrderType>("42").is_err());
        assert!(serde_json::from_str::<OrderFilling>("0").is_err());
    }

    #[test]
    fn test_side_parses_uppercase() {
        assert_eq!(serde_json::from_str::<Side>("\"BUY\"").unwrap(), Side::Buy);
        assert_eq!(Side::Sell.order_type(), OrderType::Sell);
        assert!(serde_json::from_str::<Side>("\"buy\"").is_err());
    }
}
