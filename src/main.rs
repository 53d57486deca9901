use anyhow::Context;
use backpack_connector::core::config::ExchangeConfig;
use backpack_connector::{
    build_connector, FundingInfoSource, MarketKind, OrderBookDataSource, OrderBookMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEMO_PAIR: &str = "SOL-USDC";
const DEMO_PERP_PAIR: &str = "SOL-USDC-PERP";
const RUN_FOR: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Public streams work without credentials
    let config = ExchangeConfig::from_env_auto("BACKPACK").unwrap_or_else(|e| {
        info!("no BACKPACK credentials loaded ({}), running read-only", e);
        ExchangeConfig::read_only()
    });

    let market_kind = config.market_kind;
    let pair = match market_kind {
        MarketKind::Spot => DEMO_PAIR,
        MarketKind::Perpetual => DEMO_PERP_PAIR,
    };
    let connector = Arc::new(
        build_connector(config, vec![pair.to_string()])
            .context("failed to build Backpack connector")?,
    );

    if market_kind == MarketKind::Perpetual {
        match connector.get_funding_info(pair).await {
            Ok(funding) => info!(
                pair = %funding.trading_pair,
                mark = %funding.mark_price,
                index = %funding.index_price,
                rate = %funding.rate,
                next_funding_ms = funding.next_funding_timestamp_ms,
                "funding info"
            ),
            Err(e) => warn!("funding info request failed: {}", e),
        }
    }

    match connector.get_new_order_book(pair).await {
        Ok(OrderBookMessage::Snapshot(snapshot)) => info!(
            pair = %snapshot.trading_pair,
            update_id = snapshot.update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            best_bid = ?snapshot.bids.first().map(|row| row.price.value()),
            best_ask = ?snapshot.asks.first().map(|row| row.price.value()),
            "order book snapshot"
        ),
        Ok(other) => warn!("unexpected snapshot message: {:?}", other),
        Err(e) => warn!("snapshot request failed: {}", e),
    }

    let cancel = CancellationToken::new();
    let (diff_tx, mut diff_rx) = mpsc::channel(256);
    let (trade_tx, mut trade_rx) = mpsc::channel(256);

    let stream = {
        let connector = connector.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { connector.listen_for_subscriptions(cancel).await })
    };
    let diffs = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.listen_for_order_book_diffs(diff_tx).await })
    };
    let trades = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.listen_for_trades(trade_tx).await })
    };

    let deadline = tokio::time::sleep(RUN_FOR);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("demo period elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                break;
            }
            Some(msg) = diff_rx.recv() => {
                if let OrderBookMessage::Diff(diff) = msg {
                    info!(
                        pair = %diff.trading_pair,
                        first = diff.first_update_id,
                        last = diff.update_id,
                        bids = diff.bids.len(),
                        asks = diff.asks.len(),
                        "depth diff"
                    );
                }
            }
            Some(msg) = trade_rx.recv() => {
                if let OrderBookMessage::Trade(trade) = msg {
                    info!(
                        pair = %trade.trading_pair,
                        side = ?trade.trade_type,
                        price = %trade.price.value(),
                        amount = %trade.amount.value(),
                        "trade"
                    );
                }
            }
        }
    }

    cancel.cancel();
    match stream.await {
        Ok(Ok(())) => info!("public stream closed"),
        Ok(Err(e)) => warn!("public stream ended with error: {}", e),
        Err(e) => warn!("public stream task failed: {}", e),
    }
    // Closing the outputs ends both drains
    drop(diff_rx);
    drop(trade_rx);
    for drain in [diffs, trades] {
        if let Ok(Err(e)) = drain.await {
            warn!("drain ended with error: {}", e);
        }
    }

    Ok(())
}
