use crate::core::config::MarketKind;
use crate::core::errors::ExchangeError;
use crate::core::types::{
    Balance, FundingInfo, OrderRequest, OrderState, OrderType, OrderUpdate, Price, Quantity,
    TradeFee, TradeType, TradeUpdate, TradingPair, TradingRule,
};
use crate::exchanges::backpack::constants::{
    FUNDING_INTERVAL_MS, HBOT_ORDER_ID_PREFIX, MARKET_STATUS_ONLINE, MAX_ORDER_ID_LEN,
    PERPETUAL_MARKET_TYPES,
};
use crate::exchanges::backpack::normalizer::{micros_to_ms, to_epoch_ms};
use crate::exchanges::backpack::types::{
    BackpackCapital, BackpackCollateral, BackpackFill, BackpackMarket, BackpackMarkPrice,
    BackpackMarkPriceEvent, BackpackOrder, BackpackOrderRequest, BackpackOrderUpdateEvent,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

const PERP_SUFFIX: &str = "PERP";

const DEFAULT_MIN_ORDER_SIZE: &str = "0.00000001";
const DEFAULT_MAX_ORDER_SIZE: &str = "999999999";
const DEFAULT_TICK_SIZE: &str = "0.00000001";
const DEFAULT_STEP_SIZE: &str = "0.00000001";

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(value.trim()).map_err(|e| {
        ExchangeError::DeserializationError(format!("Bad decimal in {}: {:?} ({})", field, value, e))
    })
}

fn decimal_or(field: &str, value: Option<&str>, default: &str) -> Result<Decimal, ExchangeError> {
    parse_decimal(field, value.unwrap_or(default))
}

fn optional_decimal(field: &str, value: Option<&str>) -> Result<Decimal, ExchangeError> {
    match value {
        Some(v) if !v.trim().is_empty() => parse_decimal(field, v),
        _ => Ok(Decimal::ZERO),
    }
}

// Trading pairs

/// `SOL-USDC` to `SOL_USDC`.
pub fn trading_pair_to_exchange_symbol(trading_pair: &str) -> String {
    trading_pair.replace('-', "_")
}

/// `SOL_USDC` to `SOL-USDC`.
pub fn exchange_symbol_to_trading_pair(symbol: &str) -> String {
    symbol.replace('_', "-")
}

/// Base and quote of either notation. A trailing `PERP` segment is dropped.
pub fn split_trading_pair(pair: &str) -> Result<TradingPair, ExchangeError> {
    let mut parts: Vec<&str> = pair.split(['-', '_']).collect();
    if parts.len() == 3 && parts[2].eq_ignore_ascii_case(PERP_SUFFIX) {
        parts.pop();
    }

    match parts.as_slice() {
        [base, quote] => TradingPair::new(*base, *quote)
            .map_err(|e| ExchangeError::InvalidParameters(e.to_string())),
        _ => Err(ExchangeError::InvalidParameters(format!(
            "Unrecognized trading pair: {}",
            pair
        ))),
    }
}

// Client order ids

static CLIENT_IDS: ClientIdSequence = ClientIdSequence::new();

/// Strictly increasing `clientId`s that follow the millisecond clock when it is ahead.
#[derive(Debug, Default)]
pub struct ClientIdSequence {
    last: AtomicU32,
}

impl ClientIdSequence {
    pub const fn new() -> Self {
        Self {
            last: AtomicU32::new(0),
        }
    }

    /// `max(timestamp_ms mod 2^32, last + 1)`.
    pub fn next(&self, timestamp_ms: i64) -> u32 {
        let clock = timestamp_ms.rem_euclid(1 << 32) as u32;
        let step = |last: u32| clock.max(last.wrapping_add(1));
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(step(last)))
        {
            Ok(previous) | Err(previous) => step(previous),
        }
    }
}

/// Framework order id plus the numeric `clientId` the exchange stores for it.
///
/// Ids come from one process-wide sequence, so two orders created in the same
/// millisecond still get different ids.
pub fn new_client_order_id(timestamp_ms: i64) -> (String, u32) {
    let client_id = CLIENT_IDS.next(timestamp_ms);
    let mut order_id = order_id_from_client_id(client_id);
    order_id.truncate(MAX_ORDER_ID_LEN);
    (order_id, client_id)
}

/// Inverse of [`new_client_order_id`] for ids this connector created.
pub fn client_id_from_order_id(client_order_id: &str) -> Option<u32> {
    client_order_id
        .strip_prefix(HBOT_ORDER_ID_PREFIX)
        .and_then(|n| n.parse().ok())
}

pub fn order_id_from_client_id(client_id: u32) -> String {
    format!("{}{}", HBOT_ORDER_ID_PREFIX, client_id)
}

// Sides and orders

pub fn to_backpack_side(trade_type: TradeType) -> &'static str {
    match trade_type {
        TradeType::Buy => "Bid",
        TradeType::Sell => "Ask",
    }
}

/// Wire body for `POST /api/v1/order`.
pub fn order_request_body(
    order: &OrderRequest,
    client_id: u32,
) -> Result<BackpackOrderRequest, ExchangeError> {
    let (order_type, post_only) = match order.order_type {
        OrderType::Limit => ("Limit", None),
        OrderType::LimitMaker => ("Limit", Some(true)),
        OrderType::Market => ("Market", None),
    };

    let price = match order.order_type {
        OrderType::Market => None,
        OrderType::Limit | OrderType::LimitMaker => Some(
            order
                .price
                .ok_or_else(|| {
                    ExchangeError::InvalidParameters(format!(
                        "{} requires a price",
                        order.client_order_id
                    ))
                })?
                .to_string(),
        ),
    };

    Ok(BackpackOrderRequest {
        symbol: trading_pair_to_exchange_symbol(&order.trading_pair),
        side: to_backpack_side(order.trade_type).to_string(),
        order_type: order_type.to_string(),
        quantity: order.amount.to_string(),
        price,
        time_in_force: order.time_in_force.map(|tif| tif.to_string()),
        post_only,
        client_id: Some(client_id),
    })
}

/// Exchange order status to the framework's order state.
pub fn order_state_from_status(status: &str) -> OrderState {
    match status {
        "New" => OrderState::Open,
        "PartiallyFilled" => OrderState::PartiallyFilled,
        "Filled" => OrderState::Filled,
        "Cancelled" | "Expired" => OrderState::Canceled,
        "TriggerPending" => OrderState::PendingCreate,
        "TriggerFailed" => OrderState::Failed,
        other => {
            warn!(status = other, "unknown order status, treating as failed");
            OrderState::Failed
        }
    }
}

pub fn order_update_from_event(event: &BackpackOrderUpdateEvent) -> OrderUpdate {
    OrderUpdate {
        trading_pair: exchange_symbol_to_trading_pair(&event.symbol),
        update_timestamp_ms: micros_to_ms(event.event_time),
        new_state: order_state_from_status(&event.order_status),
        client_order_id: event.client_id.map(order_id_from_client_id),
        exchange_order_id: Some(event.order_id.clone()),
    }
}

/// Only fill events produce a trade update.
pub fn trade_update_from_event(
    event: &BackpackOrderUpdateEvent,
) -> Result<Option<TradeUpdate>, ExchangeError> {
    let last_filled = optional_decimal("l", event.last_filled_quantity.as_deref())?;
    let is_fill = event.execution_type.as_deref() == Some("Fill")
        || event.event_type == "orderFill"
        || !last_filled.is_zero();
    if !is_fill {
        return Ok(None);
    }

    let price = optional_decimal("L", event.last_filled_price.as_deref())?;
    let quote = match event.last_quote_quantity.as_deref() {
        Some(y) => parse_decimal("Y", y)?,
        None => price * last_filled,
    };
    let timestamp = event.transaction_time.unwrap_or(event.event_time);

    Ok(Some(TradeUpdate {
        trade_id: event
            .trade_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", event.order_id, timestamp)),
        client_order_id: event.client_id.map(order_id_from_client_id),
        exchange_order_id: event.order_id.clone(),
        trading_pair: exchange_symbol_to_trading_pair(&event.symbol),
        fill_timestamp_ms: micros_to_ms(timestamp),
        fill_price: Price::new(price),
        fill_base_amount: Quantity::new(last_filled),
        fill_quote_amount: quote,
        fee: TradeFee {
            asset: event.fee_symbol.clone(),
            amount: optional_decimal("n", event.fee.as_deref())?,
        },
    }))
}

pub fn order_update_from_order(order: &BackpackOrder, now_ms: i64) -> OrderUpdate {
    OrderUpdate {
        trading_pair: exchange_symbol_to_trading_pair(&order.symbol),
        update_timestamp_ms: order.created_at.map_or(now_ms, to_epoch_ms),
        new_state: order_state_from_status(&order.status),
        client_order_id: order.client_id.map(order_id_from_client_id),
        exchange_order_id: Some(order.id.clone()),
    }
}

fn parse_fill_timestamp(raw: &str) -> Result<i64, ExchangeError> {
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(to_epoch_ms(n));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|e| ExchangeError::DeserializationError(format!("Bad fill time {}: {}", raw, e)))
}

pub fn trade_update_from_fill(
    fill: &BackpackFill,
    client_order_id: Option<&str>,
) -> Result<TradeUpdate, ExchangeError> {
    let price = parse_decimal("price", &fill.price)?;
    let quantity = parse_decimal("quantity", &fill.quantity)?;
    let timestamp_ms = parse_fill_timestamp(&fill.timestamp)?;

    Ok(TradeUpdate {
        trade_id: fill
            .trade_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", fill.order_id, timestamp_ms)),
        client_order_id: client_order_id
            .map(str::to_string)
            .or_else(|| fill.client_id.map(order_id_from_client_id)),
        exchange_order_id: fill.order_id.clone(),
        trading_pair: exchange_symbol_to_trading_pair(&fill.symbol),
        fill_timestamp_ms: timestamp_ms,
        fill_price: Price::new(price),
        fill_base_amount: Quantity::new(quantity),
        fill_quote_amount: price * quantity,
        fee: TradeFee {
            asset: Some(fill.fee_symbol.clone()),
            amount: parse_decimal("fee", &fill.fee)?,
        },
    })
}

// Markets

pub fn is_market_online(market: &BackpackMarket) -> bool {
    market
        .status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case(MARKET_STATUS_ONLINE) || s == "Open")
}

/// `None` for market types this connector does not trade (lending, prediction, ...).
pub fn market_kind_of(market: &BackpackMarket) -> Option<MarketKind> {
    match market.market_type.as_deref() {
        Some(t) if PERPETUAL_MARKET_TYPES.contains(&t) => Some(MarketKind::Perpetual),
        Some(t) if t.eq_ignore_ascii_case("SPOT") => Some(MarketKind::Spot),
        Some(_) => None,
        None if market.symbol.ends_with(PERP_SUFFIX) => Some(MarketKind::Perpetual),
        None => Some(MarketKind::Spot),
    }
}

/// Online and of the configured kind.
pub fn is_tradable(market: &BackpackMarket, kind: MarketKind) -> bool {
    is_market_online(market) && market_kind_of(market) == Some(kind)
}

pub fn market_trading_pair(market: &BackpackMarket) -> String {
    match (&market.base_symbol, &market.quote_symbol) {
        (Some(base), Some(quote)) if !market.symbol.ends_with(PERP_SUFFIX) => {
            format!("{}-{}", base, quote)
        }
        _ => exchange_symbol_to_trading_pair(&market.symbol),
    }
}

pub fn parse_trading_rule(market: &BackpackMarket) -> Result<TradingRule, ExchangeError> {
    let filters = market.filters.clone().unwrap_or_default();
    let quantity = filters.quantity.unwrap_or_default();
    let price = filters.price.unwrap_or_default();
    let notional = filters.notional.unwrap_or_default();

    let tick = decimal_or("tickSize", price.tick_size.as_deref(), DEFAULT_TICK_SIZE)?;

    Ok(TradingRule {
        trading_pair: market_trading_pair(market),
        min_order_size: decimal_or(
            "minQuantity",
            quantity.min_quantity.as_deref(),
            DEFAULT_MIN_ORDER_SIZE,
        )?,
        max_order_size: decimal_or(
            "maxQuantity",
            quantity.max_quantity.as_deref(),
            DEFAULT_MAX_ORDER_SIZE,
        )?,
        min_price_increment: tick,
        min_base_amount_increment: decimal_or(
            "stepSize",
            quantity.step_size.as_deref(),
            DEFAULT_STEP_SIZE,
        )?,
        min_quote_amount_increment: tick,
        min_notional_size: optional_decimal("minNotional", notional.min_notional.as_deref())?,
        supports_limit_orders: true,
        supports_market_orders: true,
    })
}

/// Rules for every online market of `kind`. A market that fails to parse is logged and skipped.
pub fn parse_trading_rules(markets: &[BackpackMarket], kind: MarketKind) -> Vec<TradingRule> {
    markets
        .iter()
        .filter(|m| is_tradable(m, kind))
        .filter_map(|market| match parse_trading_rule(market) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(symbol = %market.symbol, error = %e, "skipping market with bad trading rule");
                None
            }
        })
        .collect()
}

// Funding

/// Next settlement boundary strictly after `now_ms`, for feeds that omit it.
pub fn next_funding_boundary_ms(now_ms: i64) -> i64 {
    now_ms - now_ms.rem_euclid(FUNDING_INTERVAL_MS) + FUNDING_INTERVAL_MS
}

fn funding_info(
    symbol: &str,
    mark_price: &str,
    index_price: Option<&str>,
    rate: Option<&str>,
    next_funding: Option<i64>,
    now_ms: i64,
) -> Result<FundingInfo, ExchangeError> {
    let mark = parse_decimal("markPrice", mark_price)?;
    let index = match index_price {
        Some(i) if !i.trim().is_empty() => parse_decimal("indexPrice", i)?,
        _ => mark,
    };

    Ok(FundingInfo {
        trading_pair: exchange_symbol_to_trading_pair(symbol),
        index_price: Price::new(index),
        mark_price: Price::new(mark),
        next_funding_timestamp_ms: next_funding
            .map_or_else(|| next_funding_boundary_ms(now_ms), to_epoch_ms),
        rate: optional_decimal("fundingRate", rate)?,
    })
}

/// Missing index price falls back to the mark price, missing rate to zero.
pub fn funding_info_from_mark_price(
    entry: &BackpackMarkPrice,
    now_ms: i64,
) -> Result<FundingInfo, ExchangeError> {
    funding_info(
        &entry.symbol,
        &entry.mark_price,
        entry.index_price.as_deref(),
        entry.funding_rate.as_deref(),
        entry.next_funding_timestamp,
        now_ms,
    )
}

pub fn funding_info_from_event(event: &BackpackMarkPriceEvent) -> Result<FundingInfo, ExchangeError> {
    funding_info(
        &event.symbol,
        &event.mark_price,
        event.index_price.as_deref(),
        event.funding_rate.as_deref(),
        event.next_funding_time,
        micros_to_ms(event.event_time),
    )
}

// Balances

/// One balance per asset across spot capital and collateral.
pub fn merge_balances(
    capital: &BackpackCapital,
    collateral: &BackpackCollateral,
) -> Result<Vec<Balance>, ExchangeError> {
    let mut merged: BTreeMap<String, Balance> = BTreeMap::new();

    for (asset, entry) in capital {
        let available = parse_decimal("available", &entry.available)?;
        let locked = parse_decimal("locked", &entry.locked)?;
        let staked = optional_decimal("staked", entry.staked.as_deref())?;
        merged.insert(
            asset.clone(),
            Balance {
                asset: asset.clone(),
                available,
                locked,
                total: available + locked + staked,
            },
        );
    }

    for entry in &collateral.collateral {
        let total = parse_decimal("totalQuantity", &entry.total_quantity)?;
        let available = entry
            .available_quantity
            .as_deref()
            .map(|v| parse_decimal("availableQuantity", v))
            .transpose()?;

        match merged.get_mut(&entry.symbol) {
            Some(balance) => {
                balance.total = balance.total.max(total);
                if let Some(available) = available {
                    balance.available = available;
                }
            }
            None => {
                let available = available.unwrap_or(total);
                merged.insert(
                    entry.symbol.clone(),
                    Balance {
                        asset: entry.symbol.clone(),
                        available,
                        locked: (total - available).max(Decimal::ZERO),
                        total,
                    },
                );
            }
        }
    }

    Ok(merged.into_values().collect())
}
