use mtbridge_core::*;
use tracing::info;

/// Route a decoded command to its handler.
pub async fn dispatch<P: Platform + ?Sized>(platform: &mut P, command: Command) -> Outcome {
    match command {
        Command::Ping => Ok(Reply::pong()),
        Command::Trade { request } => execute_trade(platform, request).await,
        Command::ModifyPosition { ticket, sl, tp } => modify_position(platform, ticket, sl, tp).await,
        Command::GetAccountInfo => get_account_info(platform).await,
        Command::GetSymbolInfo { symbol } => get_symbol_info(platform, symbol.as_deref()).await,
    }
}

fn missing(field: &str) -> Failure {
    Failure::new(format!("Missing required field: {}", field))
}

/// Open a market position.
///
/// The symbol must resolve before anything is submitted. Price, stop-loss
/// and take-profit are forwarded exactly when the client supplied them.
pub async fn execute_trade<P: Platform + ?Sized>(platform: &mut P, params: TradeParams) -> Outcome {
    let symbol = params.symbol.ok_or_else(|| missing("symbol"))?;
    let side = params.side.ok_or_else(|| missing("action"))?;

    if platform.symbol_info(&symbol).await?.is_none() {
        return Err(Failure::new(format!("Symbol {} not found", symbol)));
    }

    let volume = params.volume.unwrap_or(DEFAULT_TRADE_VOLUME);
    let mut request = TradeRequest::deal(&symbol, side, volume);
    request.price = params.price;
    request.sl = params.sl;
    request.tp = params.tp;
    request.comment = Some(
        params
            .comment
            .unwrap_or_else(|| DEFAULT_TRADE_COMMENT.to_string()),
    );

    let result = platform.order_send(&request).await?;
    if !result.is_done() {
        return Err(Failure::rejected(
            format!("Order failed: {}", result.comment),
            result.retcode,
        ));
    }

    info!(
        ticket = result.order,
        symbol = %symbol,
        side = ?side,
        price = result.price,
        volume = result.volume,
        "Trade executed"
    );
    Ok(Reply::Trade {
        ticket: result.order,
        price: result.price,
        volume: result.volume,
    })
}

/// Change stop-loss and/or take-profit of an open position.
pub async fn modify_position<P: Platform + ?Sized>(
    platform: &mut P,
    ticket: Option<u64>,
    sl: Option<f64>,
    tp: Option<f64>,
) -> Outcome {
    let ticket = ticket.ok_or_else(|| missing("ticket"))?;

    let positions = platform.positions_get(ticket).await?;
    let Some(position) = positions.first() else {
        return Err(Failure::new("Position not found"));
    };

    let mut request = TradeRequest::sltp(ticket, &position.symbol);
    request.sl = sl;
    request.tp = tp;

    let result = platform.order_send(&request).await?;
    if !result.is_done() {
        return Err(Failure::rejected(
            format!("Modification failed: {}", result.comment),
            result.retcode,
        ));
    }

    info!(ticket, sl = ?sl, tp = ?tp, "Position modified");
    Ok(Reply::Position { ticket })
}

pub async fn get_account_info<P: Platform + ?Sized>(platform: &mut P) -> Outcome {
    match platform.account_info().await? {
        Some(info) => Ok(Reply::Account {
            account: AccountSummary::from(&info),
        }),
        None => Err(Failure::new("Failed to get account info")),
    }
}

pub async fn get_symbol_info<P: Platform + ?Sized>(platform: &mut P, symbol: Option<&str>) -> Outcome {
    let symbol = symbol.ok_or_else(|| missing("symbol"))?;
    match platform.symbol_info(symbol).await? {
        Some(info) => Ok(Reply::Symbol {
            symbol: SymbolSummary::from(&info),
        }),
        None => Err(Failure::new(format!("Symbol {} not found", symbol))),
    }
}
