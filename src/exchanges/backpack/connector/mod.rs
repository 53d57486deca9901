use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::traits::{
    AccountInfo, ExchangeConnector, FundingInfoSource, OrderBookDataSource, OrderPlacer,
    UserStreamDataSource,
};
use crate::core::types::{
    Balance, FundingInfo, OrderBookMessage, OrderRequest, OrderUpdate, PlacedOrder, TradeUpdate,
    TradingRule, UserStreamEvent,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod account;
pub mod market_data;
pub mod trading;
pub mod user_stream;

pub use account::Account;
pub use market_data::MarketData;
pub use trading::Trading;
pub use user_stream::UserStream;

/// Backpack connector that composes all sub-trait implementations
pub struct BackpackConnector<R: RestClient> {
    pub market: MarketData<R>,
    pub user_stream: Option<UserStream>,
    pub trading: Trading<R>,
    pub account: Account<R>,
}

impl<R: RestClient + Clone> BackpackConnector<R> {
    pub fn new(rest: &R, market: MarketData<R>, user_stream: Option<UserStream>) -> Self {
        Self {
            account: Account::new(rest, market.market_kind()),
            market,
            user_stream,
            trading: Trading::new(rest),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_stream.is_some()
    }
}

// Implement traits for the connector by delegating to sub-components

#[async_trait]
impl<R: RestClient + Clone> OrderBookDataSource for BackpackConnector<R> {
    async fn get_new_order_book(
        &self,
        trading_pair: &str,
    ) -> Result<OrderBookMessage, ExchangeError> {
        self.market.get_new_order_book(trading_pair).await
    }

    async fn listen_for_subscriptions(
        &self,
        cancel: CancellationToken,
    ) -> Result<(), ExchangeError> {
        self.market.listen_for_subscriptions(cancel).await
    }

    async fn listen_for_order_book_diffs(
        &self,
        output: mpsc::Sender<OrderBookMessage>,
    ) -> Result<(), ExchangeError> {
        self.market.listen_for_order_book_diffs(output).await
    }

    async fn listen_for_trades(
        &self,
        output: mpsc::Sender<OrderBookMessage>,
    ) -> Result<(), ExchangeError> {
        self.market.listen_for_trades(output).await
    }

    async fn get_last_traded_prices(
        &self,
        trading_pairs: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        self.market.get_last_traded_prices(trading_pairs).await
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<String>, ExchangeError> {
        self.market.fetch_trading_pairs().await
    }
}

#[async_trait]
impl<R: RestClient + Clone> UserStreamDataSource for BackpackConnector<R> {
    async fn listen_for_user_stream(
        &self,
        output: mpsc::Sender<UserStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ExchangeError> {
        match &self.user_stream {
            Some(stream) => stream.listen_for_user_stream(output, cancel).await,
            None => Err(ExchangeError::AuthenticationRequired),
        }
    }

    fn last_recv_time(&self) -> i64 {
        self.user_stream
            .as_ref()
            .map_or(0, |stream| stream.last_recv_time())
    }
}

#[async_trait]
impl<R: RestClient + Clone> OrderPlacer for BackpackConnector<R> {
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        self.trading.place_order(order).await
    }

    async fn cancel_order(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<bool, ExchangeError> {
        self.trading
            .cancel_order(trading_pair, client_order_id, exchange_order_id)
            .await
    }

    async fn request_order_status(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<OrderUpdate, ExchangeError> {
        self.trading
            .request_order_status(trading_pair, client_order_id, exchange_order_id)
            .await
    }

    async fn all_trade_updates_for_order(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: &str,
    ) -> Result<Vec<TradeUpdate>, ExchangeError> {
        self.trading
            .all_trade_updates_for_order(trading_pair, client_order_id, exchange_order_id)
            .await
    }
}

#[async_trait]
impl<R: RestClient + Clone> AccountInfo for BackpackConnector<R> {
    async fn get_account_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        self.account.get_account_balance().await
    }

    async fn get_trading_rules(&self) -> Result<Vec<TradingRule>, ExchangeError> {
        self.account.get_trading_rules().await
    }
}

#[async_trait]
impl<R: RestClient + Clone> FundingInfoSource for BackpackConnector<R> {
    async fn get_funding_info(&self, trading_pair: &str) -> Result<FundingInfo, ExchangeError> {
        self.market.get_funding_info(trading_pair).await
    }

    async fn listen_for_funding_info(
        &self,
        output: mpsc::Sender<FundingInfo>,
    ) -> Result<(), ExchangeError> {
        self.market.listen_for_funding_info(output).await
    }
}

impl<R: RestClient + Clone> ExchangeConnector for BackpackConnector<R> {}
