use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid trading pair: {0}")]
    InvalidTradingPair(String),
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(#[from] rust_decimal::Error),
}

/// Trading pair in the host framework's `BASE-QUOTE` notation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, TypesError> {
        let base = base.into();
        let quote = quote.into();

        if base.is_empty() || quote.is_empty() {
            return Err(TypesError::InvalidTradingPair(format!("{}-{}", base, quote)));
        }

        Ok(Self { base, quote })
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// Exact decimal price. Never routed through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Price {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Price {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Decimal::from_str(s)?))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exact decimal quantity. Zero is meaningful in diffs (level removal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Quantity {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Quantity {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Decimal::from_str(s)?))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One price level tagged with the sequence id it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookRow {
    pub price: Price,
    pub quantity: Quantity,
    pub update_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub trading_pair: String,
    /// Non-increasing by price.
    pub bids: Vec<OrderBookRow>,
    /// Non-decreasing by price.
    pub asks: Vec<OrderBookRow>,
    pub update_id: i64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDiff {
    pub trading_pair: String,
    pub bids: Vec<OrderBookRow>,
    pub asks: Vec<OrderBookRow>,
    pub update_id: i64,
    pub first_update_id: i64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicTrade {
    pub trading_pair: String,
    pub trade_type: TradeType,
    pub trade_id: i64,
    pub price: Price,
    pub amount: Quantity,
    pub timestamp_ms: i64,
}

/// Canonical message handed to the framework's order book tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBookMessage {
    Snapshot(OrderBookSnapshot),
    Diff(OrderBookDiff),
    Trade(PublicTrade),
}

impl OrderBookMessage {
    pub fn trading_pair(&self) -> &str {
        match self {
            Self::Snapshot(s) => &s.trading_pair,
            Self::Diff(d) => &d.trading_pair,
            Self::Trade(t) => &t.trading_pair,
        }
    }

    pub fn update_id(&self) -> i64 {
        match self {
            Self::Snapshot(s) => s.update_id,
            Self::Diff(d) => d.update_id,
            Self::Trade(t) => t.trade_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    LimitMaker,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum TimeInForce {
    GTC,
    IOC,
    FOK,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GTC => "GTC",
            Self::IOC => "IOC",
            Self::FOK => "FOK",
        };
        f.write_str(s)
    }
}

/// Order states understood by the framework's in-flight order tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    PendingCreate,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Failed,
}

impl OrderState {
    pub fn is_done(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub trading_pair: String,
    pub trade_type: TradeType,
    pub order_type: OrderType,
    pub amount: Quantity,
    pub price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub state: OrderState,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub trading_pair: String,
    pub update_timestamp_ms: i64,
    pub new_state: OrderState,
    pub client_order_id: Option<String>,
    pub exchange_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFee {
    pub asset: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeUpdate {
    pub trade_id: String,
    pub client_order_id: Option<String>,
    pub exchange_order_id: String,
    pub trading_pair: String,
    pub fill_timestamp_ms: i64,
    pub fill_price: Price,
    pub fill_base_amount: Quantity,
    pub fill_quote_amount: Decimal,
    pub fee: TradeFee,
}

/// Events produced by the private user stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStreamEvent {
    Order(OrderUpdate),
    Trade(TradeUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingRule {
    pub trading_pair: String,
    pub min_order_size: Decimal,
    pub max_order_size: Decimal,
    pub min_price_increment: Decimal,
    pub min_base_amount_increment: Decimal,
    pub min_quote_amount_increment: Decimal,
    pub min_notional_size: Decimal,
    pub supports_limit_orders: bool,
    pub supports_market_orders: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
}

/// Funding state of one perpetual market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInfo {
    pub trading_pair: String,
    pub index_price: Price,
    pub mark_price: Price,
    pub next_funding_timestamp_ms: i64,
    /// Rate for the current interval, e.g. `0.0001` for 0.01%.
    pub rate: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_parsing_is_exact() {
        let price: Price = "0.1".parse().unwrap();
        let sum = price.value() + Decimal::from_str("0.2").unwrap();
        assert_eq!(sum, Decimal::from_str("0.3").unwrap());
        assert!("abc".parse::<Price>().is_err());
    }

    #[test]
    fn test_price_serde_uses_strings() {
        let row = OrderBookRow {
            price: "101.25".parse().unwrap(),
            quantity: "0".parse().unwrap(),
            update_id: 7,
        };
        let json = serde_json::to_value(row).unwrap();
        assert_eq!(json["price"], "101.25");
        assert_eq!(json["quantity"], "0");
        assert!(row.quantity.is_zero());
    }

    #[test]
    fn test_trading_pair_display() {
        let pair = TradingPair::new("SOL", "USDC").unwrap();
        assert_eq!(pair.to_string(), "SOL-USDC");
        assert!(TradingPair::new("", "USDC").is_err());
    }

    #[test]
    fn test_terminal_order_states() {
        assert!(OrderState::Filled.is_done());
        assert!(OrderState::Canceled.is_done());
        assert!(!OrderState::PartiallyFilled.is_done());
    }
}
