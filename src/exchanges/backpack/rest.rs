use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::exchanges::backpack::constants::{
    CAPITAL_PATH_URL, COLLATERAL_PATH_URL, FILLS_PATH_URL, MARKETS_PATH_URL,
    MARK_PRICES_PATH_URL, ORDERS_PATH_URL, ORDER_BOOK_PATH_URL, ORDER_PATH_URL,
    SERVER_TIME_PATH_URL, TICKERS_PATH_URL, TRADES_PATH_URL,
};
use crate::exchanges::backpack::types::{
    BackpackCancelRequest, BackpackCapital, BackpackCollateral, BackpackDepth, BackpackFill,
    BackpackMarkPrice, BackpackMarket, BackpackOrder, BackpackOrderRequest, BackpackTicker,
    BackpackTrade,
};
use serde_json::{json, Value};

/// Thin typed wrapper around `RestClient` for Backpack API
#[derive(Debug, Clone)]
pub struct BackpackRestClient<R: RestClient> {
    client: R,
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, ExchangeError> {
    serde_json::to_value(value).map_err(|e| {
        ExchangeError::SerializationError(format!("Failed to serialize request: {}", e))
    })
}

impl<R: RestClient> BackpackRestClient<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    pub fn inner(&self) -> &R {
        &self.client
    }

    pub async fn get_markets(&self) -> Result<Vec<BackpackMarket>, ExchangeError> {
        self.client.get_json(MARKETS_PATH_URL, &[], false).await
    }

    pub async fn get_tickers(&self) -> Result<Vec<BackpackTicker>, ExchangeError> {
        self.client.get_json(TICKERS_PATH_URL, &[], false).await
    }

    pub async fn get_depth(&self, symbol: &str) -> Result<BackpackDepth, ExchangeError> {
        self.client
            .get_json(ORDER_BOOK_PATH_URL, &[("symbol", symbol)], false)
            .await
    }

    /// Mark price, index price and funding rate of perpetual markets.
    pub async fn get_mark_prices(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<BackpackMarkPrice>, ExchangeError> {
        let params: Vec<(&str, &str)> = symbol.map(|s| ("symbol", s)).into_iter().collect();
        self.client.get_json(MARK_PRICES_PATH_URL, &params, false).await
    }

    pub async fn get_trades(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Vec<BackpackTrade>, ExchangeError> {
        let limit_str = limit.map(|l| l.to_string());
        let mut params = vec![("symbol", symbol)];

        if let Some(ref limit) = limit_str {
            params.push(("limit", limit.as_str()));
        }

        self.client.get_json(TRADES_PATH_URL, &params, false).await
    }

    /// Exchange clock in epoch milliseconds.
    pub async fn get_server_time(&self) -> Result<i64, ExchangeError> {
        let value: Value = self.client.get_json(SERVER_TIME_PATH_URL, &[], false).await?;
        let millis = match &value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        millis
            .ok_or_else(|| ExchangeError::DeserializationError(format!("Bad server time: {}", value)))
    }

    pub async fn get_capital(&self) -> Result<BackpackCapital, ExchangeError> {
        self.client.get_json(CAPITAL_PATH_URL, &[], true).await
    }

    pub async fn get_collateral(&self) -> Result<BackpackCollateral, ExchangeError> {
        self.client.get_json(COLLATERAL_PATH_URL, &[], true).await
    }

    pub async fn execute_order(
        &self,
        order: &BackpackOrderRequest,
    ) -> Result<BackpackOrder, ExchangeError> {
        self.client
            .post_json(ORDER_PATH_URL, &to_body(order)?, true)
            .await
    }

    pub async fn cancel_order(
        &self,
        request: &BackpackCancelRequest,
    ) -> Result<BackpackOrder, ExchangeError> {
        self.client
            .delete_json(ORDER_PATH_URL, &to_body(request)?, true)
            .await
    }

    pub async fn cancel_all_orders(&self, symbol: &str) -> Result<Vec<BackpackOrder>, ExchangeError> {
        self.client
            .delete_json(ORDERS_PATH_URL, &json!({ "symbol": symbol }), true)
            .await
    }

    /// Look up one open order by exchange id or numeric client id.
    pub async fn get_order(
        &self,
        symbol: &str,
        order_id: Option<&str>,
        client_id: Option<u32>,
    ) -> Result<BackpackOrder, ExchangeError> {
        let client_id_str = client_id.map(|id| id.to_string());
        let mut params = vec![("symbol", symbol)];

        if let Some(order_id) = order_id {
            params.push(("orderId", order_id));
        }
        if let Some(ref client_id) = client_id_str {
            params.push(("clientId", client_id.as_str()));
        }

        self.client.get_json(ORDER_PATH_URL, &params, true).await
    }

    pub async fn get_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<BackpackOrder>, ExchangeError> {
        let params: Vec<(&str, &str)> = symbol.map(|s| ("symbol", s)).into_iter().collect();
        self.client.get_json(ORDERS_PATH_URL, &params, true).await
    }

    pub async fn get_fills(
        &self,
        symbol: Option<&str>,
        order_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<BackpackFill>, ExchangeError> {
        let limit_str = limit.map(|l| l.to_string());
        let mut params = vec![];

        if let Some(symbol) = symbol {
            params.push(("symbol", symbol));
        }
        if let Some(order_id) = order_id {
            params.push(("orderId", order_id));
        }
        if let Some(ref limit) = limit_str {
            params.push(("limit", limit.as_str()));
        }

        self.client.get_json(FILLS_PATH_URL, &params, true).await
    }
}
