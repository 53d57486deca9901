use crate::core::{
    errors::ExchangeError,
    types::{
        Balance, FundingInfo, OrderBookMessage, OrderRequest, OrderUpdate, PlacedOrder,
        TradeUpdate, TradingRule, UserStreamEvent,
    },
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Public market data the host's order book tracker consumes.
#[async_trait]
pub trait OrderBookDataSource: Send + Sync {
    /// Fresh REST snapshot for one framework trading pair.
    async fn get_new_order_book(
        &self,
        trading_pair: &str,
    ) -> Result<OrderBookMessage, ExchangeError>;

    /// Keep the public socket alive until `cancel` fires.
    ///
    /// Transport failures are recovered internally and never end this call.
    async fn listen_for_subscriptions(&self, cancel: CancellationToken)
        -> Result<(), ExchangeError>;

    /// Forward normalized diffs until `output` is closed.
    async fn listen_for_order_book_diffs(
        &self,
        output: mpsc::Sender<OrderBookMessage>,
    ) -> Result<(), ExchangeError>;

    /// Forward normalized public trades until `output` is closed.
    async fn listen_for_trades(
        &self,
        output: mpsc::Sender<OrderBookMessage>,
    ) -> Result<(), ExchangeError>;

    async fn get_last_traded_prices(
        &self,
        trading_pairs: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Tradable pairs in framework format.
    async fn fetch_trading_pairs(&self) -> Result<Vec<String>, ExchangeError>;
}

/// Private account events.
#[async_trait]
pub trait UserStreamDataSource: Send + Sync {
    async fn listen_for_user_stream(
        &self,
        output: mpsc::Sender<UserStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ExchangeError>;

    /// Epoch milliseconds of the last private frame, 0 if none yet.
    fn last_recv_time(&self) -> i64;
}

#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError>;

    /// Cancel by exchange order id when known, otherwise by client order id.
    async fn cancel_order(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<bool, ExchangeError>;

    async fn request_order_status(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<OrderUpdate, ExchangeError>;

    async fn all_trade_updates_for_order(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: &str,
    ) -> Result<Vec<TradeUpdate>, ExchangeError>;
}

#[async_trait]
pub trait AccountInfo: Send + Sync {
    async fn get_account_balance(&self) -> Result<Vec<Balance>, ExchangeError>;

    async fn get_trading_rules(&self) -> Result<Vec<TradingRule>, ExchangeError>;
}

/// Mark price, index price and funding rate of perpetual markets.
///
/// Spot connectors answer every call with [`ExchangeError::InvalidParameters`].
#[async_trait]
pub trait FundingInfoSource: Send + Sync {
    async fn get_funding_info(&self, trading_pair: &str) -> Result<FundingInfo, ExchangeError>;

    /// Forward funding updates from the public socket until `output` is closed.
    async fn listen_for_funding_info(
        &self,
        output: mpsc::Sender<FundingInfo>,
    ) -> Result<(), ExchangeError>;
}

/// Everything the host exchange wrapper needs from one connector.
pub trait ExchangeConnector:
    OrderBookDataSource + UserStreamDataSource + OrderPlacer + AccountInfo + FundingInfoSource
{
}
