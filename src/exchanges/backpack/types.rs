use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Backpack sends ids and sequence numbers either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn i64_from_string_or_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = string_or_number(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn opt_i64_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    opt_string_or_number(deserializer)?
        .map(|raw| raw.parse().map_err(serde::de::Error::custom))
        .transpose()
}

// REST: public

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackMarket {
    pub symbol: String,
    #[serde(default, alias = "baseCurrency")]
    pub base_symbol: Option<String>,
    #[serde(default, alias = "quoteCurrency")]
    pub quote_symbol: Option<String>,
    #[serde(default, alias = "orderBookState")]
    pub status: Option<String>,
    #[serde(default)]
    pub filters: Option<BackpackMarketFilters>,
    /// `SPOT`, `PERP`, `IPERP`, ...
    #[serde(default)]
    pub market_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackpackMarketFilters {
    #[serde(default)]
    pub price: Option<BackpackPriceFilter>,
    #[serde(default)]
    pub quantity: Option<BackpackQuantityFilter>,
    #[serde(default)]
    pub notional: Option<BackpackNotionalFilter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackPriceFilter {
    pub tick_size: Option<String>,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackQuantityFilter {
    pub min_quantity: Option<String>,
    pub max_quantity: Option<String>,
    pub step_size: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackNotionalFilter {
    pub min_notional: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackTicker {
    pub symbol: String,
    pub last_price: String,
    #[serde(default)]
    pub volume: Option<String>,
}

/// `/api/v1/depth` body. Levels are `[price, quantity]` string pairs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackDepth {
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
    #[serde(deserialize_with = "i64_from_string_or_number")]
    pub last_update_id: i64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackTrade {
    #[serde(default)]
    pub id: Option<i64>,
    pub price: String,
    pub quantity: String,
    #[serde(default)]
    pub quote_quantity: Option<String>,
    pub timestamp: i64,
    pub is_buyer_maker: bool,
}

/// One entry of `/api/v1/markPrices`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackMarkPrice {
    pub symbol: String,
    pub mark_price: String,
    #[serde(default)]
    pub index_price: Option<String>,
    #[serde(default)]
    pub funding_rate: Option<String>,
    #[serde(
        default,
        alias = "nextFundingTime",
        deserialize_with = "opt_i64_from_string_or_number"
    )]
    pub next_funding_timestamp: Option<i64>,
}

// REST: private

#[derive(Debug, Clone, Deserialize)]
pub struct BackpackCapitalEntry {
    pub available: String,
    pub locked: String,
    #[serde(default)]
    pub staked: Option<String>,
}

/// `/api/v1/capital`: asset symbol to spot balances.
pub type BackpackCapital = BTreeMap<String, BackpackCapitalEntry>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackpackCollateral {
    #[serde(default)]
    pub collateral: Vec<BackpackCollateralEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackCollateralEntry {
    pub symbol: String,
    pub total_quantity: String,
    #[serde(default)]
    pub available_quantity: Option<String>,
    #[serde(default)]
    pub lend_quantity: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackOrderRequest {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackCancelRequest {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackOrder {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub client_id: Option<u32>,
    pub symbol: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    pub status: String,
    #[serde(default)]
    pub executed_quantity: Option<String>,
    #[serde(default)]
    pub executed_quote_quantity: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackpackFill {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub trade_id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub order_id: String,
    #[serde(default)]
    pub client_id: Option<u32>,
    pub symbol: String,
    pub side: String,
    pub price: String,
    pub quantity: String,
    pub fee: String,
    pub fee_symbol: String,
    /// ISO-8601 without zone, e.g. `2024-05-01T12:00:00.123`.
    pub timestamp: String,
}

// WebSocket

/// Every stream frame arrives wrapped as `{"stream": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BackpackStreamEnvelope {
    pub stream: String,
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpackDepthEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    /// Microseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: i64,
    #[serde(rename = "u")]
    pub final_update_id: i64,
    #[serde(rename = "b", default)]
    pub bids: Vec<(String, String)>,
    #[serde(rename = "a", default)]
    pub asks: Vec<(String, String)>,
    #[serde(rename = "T", default)]
    pub transaction_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpackTradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
    /// Microseconds.
    #[serde(rename = "T")]
    pub trade_time: i64,
}

/// `markPrice.<symbol>` update for perpetual markets.
#[derive(Debug, Clone, Deserialize)]
pub struct BackpackMarkPriceEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    /// Microseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub mark_price: String,
    #[serde(rename = "f", default)]
    pub funding_rate: Option<String>,
    #[serde(rename = "i", default)]
    pub index_price: Option<String>,
    #[serde(rename = "n", default, deserialize_with = "opt_i64_from_string_or_number")]
    pub next_funding_time: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpackOrderUpdateEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", default)]
    pub client_id: Option<u32>,
    #[serde(rename = "S", default)]
    pub side: Option<String>,
    #[serde(rename = "o", default)]
    pub order_type: Option<String>,
    #[serde(rename = "f", default)]
    pub time_in_force: Option<String>,
    #[serde(rename = "q", default)]
    pub quantity: Option<String>,
    #[serde(rename = "p", default)]
    pub price: Option<String>,
    #[serde(rename = "P", default)]
    pub stop_price: Option<String>,
    #[serde(rename = "x", default)]
    pub execution_type: Option<String>,
    #[serde(rename = "X")]
    pub order_status: String,
    #[serde(rename = "i", deserialize_with = "string_or_number")]
    pub order_id: String,
    #[serde(rename = "l", default)]
    pub last_filled_quantity: Option<String>,
    #[serde(rename = "z", default)]
    pub cumulative_filled_quantity: Option<String>,
    #[serde(rename = "L", default)]
    pub last_filled_price: Option<String>,
    #[serde(rename = "n", default)]
    pub fee: Option<String>,
    #[serde(rename = "N", default)]
    pub fee_symbol: Option<String>,
    #[serde(rename = "T", default)]
    pub transaction_time: Option<i64>,
    #[serde(rename = "t", default, deserialize_with = "opt_string_or_number")]
    pub trade_id: Option<String>,
    #[serde(rename = "O", default)]
    pub origin: Option<Value>,
    #[serde(rename = "Z", default)]
    pub cumulative_quote_quantity: Option<String>,
    #[serde(rename = "Y", default)]
    pub last_quote_quantity: Option<String>,
    #[serde(rename = "Q", default)]
    pub quote_quantity: Option<String>,
}
