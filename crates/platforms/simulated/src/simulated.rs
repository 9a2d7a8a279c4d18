use async_trait::async_trait;
use chrono::Utc;
use mtbridge_core::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Configuration for the simulated platform.
#[derive(Debug, Clone)]
pub struct SimulatedPlatformConfig {
    /// Starting account snapshot.
    pub account: AccountInfo,
    /// Tradable symbols and their quotes.
    pub symbols: Vec<SymbolInfo>,
    /// Whether a trading account is logged in.
    pub logged_in: bool,
    /// Whether "Allow automated trading" is enabled.
    pub trade_allowed: bool,
    /// Margin reserved per lot opened.
    pub margin_per_lot: f64,
    /// Ticket assigned to the first order.
    pub first_ticket: u64,
    /// Most recent `order_send` requests kept for inspection.
    pub journal_limit: usize,
}

impl Default for SimulatedPlatformConfig {
    fn default() -> Self {
        Self {
            account: AccountInfo {
                login: 5_000_001,
                balance: 10_000.0,
                equity: 10_000.0,
                margin: 0.0,
                margin_free: 10_000.0,
                currency: "USD".to_string(),
                leverage: 100,
                server: "Simulated-Demo".to_string(),
                trade_allowed: true,
            },
            symbols: vec![
                forex("EURUSD", 1.0950, 1.0952, 5),
                forex("GBPUSD", 1.2650, 1.2652, 5),
                forex("USDJPY", 149.50, 149.52, 3),
                SymbolInfo {
                    name: "XAUUSD".to_string(),
                    bid: 2350.10,
                    ask: 2350.40,
                    point: 0.01,
                    digits: 2,
                    spread: 30,
                    volume_min: 0.01,
                    volume_max: 50.0,
                    volume_step: 0.01,
                    description: "Gold vs US Dollar".to_string(),
                },
            ],
            logged_in: true,
            trade_allowed: true,
            margin_per_lot: 1_000.0,
            first_ticket: 100_000_001,
            journal_limit: 1_000,
        }
    }
}

fn forex(name: &str, bid: f64, ask: f64, digits: u32) -> SymbolInfo {
    let point = 10f64.powi(-(digits as i32));
    SymbolInfo {
        name: name.to_string(),
        bid,
        ask,
        point,
        digits,
        spread: ((ask - bid) / point).round() as i64,
        volume_min: 0.01,
        volume_max: 100.0,
        volume_step: 0.01,
        description: String::new(),
    }
}

/// How many times each platform operation has been invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub account_info: usize,
    pub symbol_info: usize,
    pub positions_get: usize,
    pub order_send: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.account_info + self.symbol_info + self.positions_get + self.order_send
    }
}

/// An in-memory trading platform.
///
/// Market deals fill immediately at the current quote (or the requested
/// price) and open a position under a fresh ticket.
pub struct SimulatedPlatform {
    config: SimulatedPlatformConfig,
    connected: bool,
    account: AccountInfo,
    account_available: bool,
    symbols: HashMap<String, SymbolInfo>,
    positions: BTreeMap<u64, PositionInfo>,
    next_ticket: u64,
    next_request_id: u32,
    pending_rejection: Option<(u32, String)>,
    last_error: LastError,
    calls: CallCounts,
    submitted: Vec<TradeRequest>,
}

impl SimulatedPlatform {
    pub fn new(config: SimulatedPlatformConfig) -> Self {
        let symbols = config
            .symbols
            .iter()
            .map(|s| (s.name.clone(), s.clone()))
            .collect();
        Self {
            account: config.account.clone(),
            account_available: true,
            symbols,
            positions: BTreeMap::new(),
            next_ticket: config.first_ticket,
            next_request_id: 1,
            pending_rejection: None,
            last_error: LastError::none(),
            calls: CallCounts::default(),
            submitted: Vec::new(),
            connected: false,
            config,
        }
    }

    /// Update the quote of a symbol.
    pub fn set_quote(&mut self, symbol: &str, bid: f64, ask: f64) {
        if let Some(info) = self.symbols.get_mut(symbol) {
            info.bid = bid;
            info.ask = ask;
            info.spread = ((ask - bid) / info.point).round() as i64;
        }
    }

    /// Make the account snapshot unavailable (or available again).
    pub fn set_account_available(&mut self, available: bool) {
        self.account_available = available;
    }

    /// Reject the next `order_send` with the given return code.
    pub fn reject_next(&mut self, retcode: u32, comment: &str) {
        self.pending_rejection = Some((retcode, comment.to_string()));
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Requests passed to `order_send`, oldest first, up to `journal_limit`.
    pub fn submitted(&self) -> &[TradeRequest] {
        &self.submitted
    }

    pub fn open_positions(&self) -> Vec<PositionInfo> {
        self.positions.values().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn ensure_connected(&mut self) -> Result<(), PlatformError> {
        if self.connected {
            Ok(())
        } else {
            self.last_error = LastError {
                code: -10004,
                message: "No IPC connection".to_string(),
            };
            Err(PlatformError::NotConnected)
        }
    }

    fn executed(&mut self, ticket: u64, volume: f64, price: f64, symbol: &str) -> OrderSendResult {
        let (bid, ask) = self
            .symbols
            .get(symbol)
            .map(|s| (s.bid, s.ask))
            .unwrap_or_default();
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        OrderSendResult {
            retcode: retcode::DONE,
            deal: ticket,
            order: ticket,
            volume,
            price,
            bid,
            ask,
            comment: "Request executed".to_string(),
            request_id,
        }
    }

    /// Simulate a market deal.
    fn execute_deal(&mut self, request: &TradeRequest) -> OrderSendResult {
        let Some(symbol) = self.symbols.get(&request.symbol).cloned() else {
            return OrderSendResult::rejected(retcode::INVALID, "Invalid request");
        };

        let volume = request.volume.unwrap_or(0.0);
        if !volume_is_valid(volume, &symbol) {
            return OrderSendResult::rejected(retcode::INVALID_VOLUME, "Invalid volume");
        }

        let (position_type, market_price) = match request.order_type {
            Some(OrderType::Buy) => (PositionType::Buy, symbol.ask),
            Some(OrderType::Sell) => (PositionType::Sell, symbol.bid),
            None => return OrderSendResult::rejected(retcode::INVALID, "Missing order type"),
        };
        let price = request.price.unwrap_or(market_price);

        let margin = volume * self.config.margin_per_lot;
        if margin > self.account.margin_free {
            return OrderSendResult::rejected(retcode::NO_MONEY, "No money");
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.positions.insert(
            ticket,
            PositionInfo {
                ticket,
                symbol: symbol.name.clone(),
                position_type,
                volume,
                price_open: price,
                sl: request.sl.unwrap_or(0.0),
                tp: request.tp.unwrap_or(0.0),
                time: Utc::now(),
                comment: request.comment.clone().unwrap_or_default(),
            },
        );
        self.account.margin += margin;
        self.account.margin_free = self.account.equity - self.account.margin;

        debug!(ticket, symbol = %symbol.name, volume, price, "Simulated deal filled");
        self.executed(ticket, volume, price, &symbol.name)
    }

    /// Simulate a stop-loss / take-profit change.
    fn modify_stops(&mut self, request: &TradeRequest) -> OrderSendResult {
        let position = request
            .position
            .and_then(|ticket| self.positions.get_mut(&ticket));
        let Some(position) = position else {
            return OrderSendResult::rejected(retcode::POSITION_CLOSED, "Position doesn't exist");
        };

        if let Some(sl) = request.sl {
            position.sl = sl;
        }
        if let Some(tp) = request.tp {
            position.tp = tp;
        }
        let symbol = position.symbol.clone();

        let mut result = self.executed(0, 0.0, 0.0, &symbol);
        result.deal = 0;
        result.order = 0;
        result
    }
}

fn volume_is_valid(volume: f64, symbol: &SymbolInfo) -> bool {
    const EPSILON: f64 = 1e-9;
    if volume + EPSILON < symbol.volume_min || volume - EPSILON > symbol.volume_max {
        return false;
    }
    if symbol.volume_step <= 0.0 {
        return true;
    }
    let steps = (volume - symbol.volume_min) / symbol.volume_step;
    (steps - steps.round()).abs() < 1e-6
}

#[async_trait]
impl Platform for SimulatedPlatform {
    async fn initialize(&mut self) -> Result<(), PlatformError> {
        if !self.config.logged_in {
            self.last_error = LastError {
                code: -6,
                message: "Terminal: Authorization failed".to_string(),
            };
            return Err(PlatformError::InitializationFailed {
                code: self.last_error.code,
                message: self.last_error.message.clone(),
            });
        }
        self.connected = true;
        self.last_error = LastError::none();
        info!(login = self.account.login, "Simulated platform initialized");
        Ok(())
    }

    async fn shutdown(&mut self) {
        if self.connected {
            info!("Simulated platform shut down");
        }
        self.connected = false;
    }

    fn last_error(&self) -> LastError {
        self.last_error.clone()
    }

    async fn account_info(&mut self) -> Result<Option<AccountInfo>, PlatformError> {
        self.calls.account_info += 1;
        self.ensure_connected()?;
        if !self.account_available {
            return Ok(None);
        }
        let mut account = self.account.clone();
        account.trade_allowed = self.config.trade_allowed;
        Ok(Some(account))
    }

    async fn symbol_info(&mut self, symbol: &str) -> Result<Option<SymbolInfo>, PlatformError> {
        self.calls.symbol_info += 1;
        self.ensure_connected()?;
        Ok(self.symbols.get(symbol).cloned())
    }

    async fn positions_get(&mut self, ticket: u64) -> Result<Vec<PositionInfo>, PlatformError> {
        self.calls.positions_get += 1;
        self.ensure_connected()?;
        Ok(self.positions.get(&ticket).cloned().into_iter().collect())
    }

    async fn order_send(&mut self, request: &TradeRequest) -> Result<OrderSendResult, PlatformError> {
        self.calls.order_send += 1;
        self.ensure_connected()?;
        if self.submitted.len() >= self.config.journal_limit {
            let excess = self.submitted.len() + 1 - self.config.journal_limit;
            self.submitted.drain(..excess.min(self.submitted.len()));
        }
        self.submitted.push(request.clone());

        if let Some((code, comment)) = self.pending_rejection.take() {
            return Ok(OrderSendResult::rejected(code, comment));
        }
        if !self.config.trade_allowed {
            return Ok(OrderSendResult::rejected(
                retcode::CLIENT_DISABLES_AT,
                "AutoTrading disabled by client",
            ));
        }

        let result = match request.action {
            TradeAction::Deal => self.execute_deal(request),
            TradeAction::Sltp => self.modify_stops(request),
        };
        Ok(result)
    }
}
