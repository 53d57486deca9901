//! Exchange payloads to canonical order book messages.
//!
//! All prices and quantities go through [`rust_decimal::Decimal`]; nothing here touches floats.

use crate::core::errors::ExchangeError;
use crate::core::types::{
    OrderBookDiff, OrderBookRow, OrderBookSnapshot, Price, PublicTrade, Quantity, TradeType,
};
use crate::exchanges::backpack::types::{BackpackDepth, BackpackDepthEvent, BackpackTradeEvent};
use std::cmp::Reverse;

/// Epoch values above this are microseconds.
const MICROS_THRESHOLD: i64 = 100_000_000_000_000;

pub fn micros_to_ms(micros: i64) -> i64 {
    micros / 1_000
}

/// Accept either epoch milliseconds or microseconds.
pub fn to_epoch_ms(value: i64) -> i64 {
    if value > MICROS_THRESHOLD {
        micros_to_ms(value)
    } else {
        value
    }
}

fn parse_rows(
    levels: &[(String, String)],
    update_id: i64,
) -> Result<Vec<OrderBookRow>, ExchangeError> {
    levels
        .iter()
        .map(|(price, quantity)| {
            let price: Price = price.parse().map_err(|e| {
                ExchangeError::DeserializationError(format!("Bad price {:?}: {}", price, e))
            })?;
            let quantity: Quantity = quantity.parse().map_err(|e| {
                ExchangeError::DeserializationError(format!("Bad quantity {:?}: {}", quantity, e))
            })?;
            Ok(OrderBookRow {
                price,
                quantity,
                update_id,
            })
        })
        .collect()
}

/// Full book from `/api/v1/depth`, bids high to low and asks low to high.
pub fn normalize_snapshot(
    depth: &BackpackDepth,
    trading_pair: &str,
    fallback_timestamp_ms: i64,
) -> Result<OrderBookSnapshot, ExchangeError> {
    let update_id = depth.last_update_id;
    let mut bids = parse_rows(&depth.bids, update_id)?;
    let mut asks = parse_rows(&depth.asks, update_id)?;

    bids.sort_by_key(|row| Reverse(row.price));
    asks.sort_by_key(|row| row.price);

    Ok(OrderBookSnapshot {
        trading_pair: trading_pair.to_string(),
        bids,
        asks,
        update_id,
        timestamp_ms: depth.timestamp.map_or(fallback_timestamp_ms, to_epoch_ms),
    })
}

/// Incremental update. Zero quantities stay in place: they delete the level downstream.
pub fn normalize_diff(
    event: &BackpackDepthEvent,
    trading_pair: &str,
) -> Result<OrderBookDiff, ExchangeError> {
    let update_id = event.final_update_id;
    Ok(OrderBookDiff {
        trading_pair: trading_pair.to_string(),
        bids: parse_rows(&event.bids, update_id)?,
        asks: parse_rows(&event.asks, update_id)?,
        update_id,
        first_update_id: event.first_update_id,
        timestamp_ms: micros_to_ms(event.event_time),
    })
}

/// The taker side is reported: a maker buyer means the aggressor sold.
pub fn normalize_trade(
    event: &BackpackTradeEvent,
    trading_pair: &str,
) -> Result<PublicTrade, ExchangeError> {
    let parsed = parse_rows(&[(event.price.clone(), event.quantity.clone())], event.trade_id)?;
    let row = parsed[0];

    Ok(PublicTrade {
        trading_pair: trading_pair.to_string(),
        trade_type: if event.buyer_is_maker {
            TradeType::Sell
        } else {
            TradeType::Buy
        },
        trade_id: event.trade_id,
        price: row.price,
        amount: row.quantity,
        timestamp_ms: micros_to_ms(event.trade_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn levels(rows: &[(&str, &str)]) -> Vec<(String, String)> {
        rows.iter()
            .map(|(p, q)| ((*p).to_string(), (*q).to_string()))
            .collect()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_snapshot_sorts_both_sides() {
        let depth = BackpackDepth {
            bids: levels(&[("99.5", "1"), ("100.25", "2"), ("98", "3"), ("100.3", "4")]),
            asks: levels(&[("101.5", "1"), ("100.9", "2"), ("102", "3"), ("100.31", "4")]),
            last_update_id: 77,
            timestamp: None,
        };
        let snapshot = normalize_snapshot(&depth, "SOL-USDC", 1_700_000_000_000).unwrap();

        let bid_prices: Vec<Decimal> = snapshot.bids.iter().map(|r| r.price.value()).collect();
        let ask_prices: Vec<Decimal> = snapshot.asks.iter().map(|r| r.price.value()).collect();
        assert_eq!(bid_prices, vec![dec("100.3"), dec("100.25"), dec("99.5"), dec("98")]);
        assert_eq!(ask_prices, vec![dec("100.31"), dec("100.9"), dec("101.5"), dec("102")]);
        assert!(snapshot.bids.windows(2).all(|w| w[0].price >= w[1].price));
        assert!(snapshot.asks.windows(2).all(|w| w[0].price <= w[1].price));
        assert!(snapshot.bids.iter().chain(&snapshot.asks).all(|r| r.update_id == 77));
        assert_eq!(snapshot.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_diff_keeps_zero_quantity_levels() {
        let event = BackpackDepthEvent {
            event_type: "depth".to_string(),
            event_time: 1_700_000_000_123_456,
            symbol: "SOL_USDC".to_string(),
            first_update_id: 100,
            final_update_id: 104,
            bids: levels(&[("100.1", "0"), ("100.0", "5.5")]),
            asks: levels(&[("100.2", "0.0")]),
            transaction_time: Some(1_700_000_000_123_000),
        };
        let diff = normalize_diff(&event, "SOL-USDC").unwrap();

        assert_eq!(diff.bids.len(), 2);
        assert!(diff.bids[0].quantity.is_zero());
        assert_eq!(diff.asks.len(), 1);
        assert!(diff.asks[0].quantity.is_zero());
        assert_eq!(diff.first_update_id, 100);
        assert_eq!(diff.update_id, 104);
        assert_eq!(diff.timestamp_ms, 1_700_000_000_123);
    }

    #[test]
    fn test_diff_prices_are_exact() {
        let event = BackpackDepthEvent {
            event_type: "depth".to_string(),
            event_time: 0,
            symbol: "SOL_USDC".to_string(),
            first_update_id: 1,
            final_update_id: 1,
            bids: levels(&[("0.1", "0.2")]),
            asks: vec![],
            transaction_time: None,
        };
        let diff = normalize_diff(&event, "SOL-USDC").unwrap();
        assert_eq!(
            diff.bids[0].price.value() + diff.bids[0].quantity.value(),
            dec("0.3")
        );
    }

    #[test]
    fn test_trade_side_follows_maker_flag() {
        let mut event = BackpackTradeEvent {
            event_type: "trade".to_string(),
            event_time: 1_700_000_000_000_000,
            symbol: "SOL_USDC".to_string(),
            trade_id: 9001,
            price: "101.5".to_string(),
            quantity: "0.25".to_string(),
            buyer_is_maker: true,
            trade_time: 1_700_000_000_999_999,
        };
        let trade = normalize_trade(&event, "SOL-USDC").unwrap();
        assert_eq!(trade.trade_type, TradeType::Sell);
        assert_eq!(trade.trade_id, 9001);
        assert_eq!(trade.timestamp_ms, 1_700_000_000_999);

        event.buyer_is_maker = false;
        assert_eq!(
            normalize_trade(&event, "SOL-USDC").unwrap().trade_type,
            TradeType::Buy
        );
    }

    #[test]
    fn test_bad_level_is_an_error() {
        let depth = BackpackDepth {
            bids: levels(&[("abc", "1")]),
            asks: vec![],
            last_update_id: 1,
            timestamp: None,
        };
        assert!(matches!(
            normalize_snapshot(&depth, "SOL-USDC", 0),
            Err(ExchangeError::DeserializationError(_))
        ));
    }

    #[test]
    fn test_epoch_unit_detection() {
        assert_eq!(to_epoch_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(to_epoch_ms(1_700_000_000_000_000), 1_700_000_000_000);
    }
}
