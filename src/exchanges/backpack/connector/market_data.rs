use crate::core::{
    config::MarketKind,
    errors::ExchangeError,
    kernel::{ChannelRouter, RestClient, StreamConfig, StreamConsumer, Throttler, TungsteniteWs},
    traits::{FundingInfoSource, OrderBookDataSource},
    types::{FundingInfo, OrderBookMessage},
};
use crate::exchanges::backpack::{
    codec::{BackpackCodec, BackpackMessage},
    constants::{DEPTH_CHANNEL, EXCHANGE_NAME, MARK_PRICE_CHANNEL, TRADE_CHANNEL},
    converters::{
        exchange_symbol_to_trading_pair, funding_info_from_event, funding_info_from_mark_price,
        is_tradable, market_trading_pair, trading_pair_to_exchange_symbol,
    },
    normalizer::{normalize_diff, normalize_snapshot, normalize_trade},
    rest::BackpackRestClient,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Public order book data source.
///
/// The depth, trade and funding queues outlive any single socket, so a reconnect
/// never invalidates a running `listen_for_*` drain.
pub struct MarketData<R: RestClient> {
    rest: BackpackRestClient<R>,
    ws_url: String,
    trading_pairs: Vec<String>,
    stream_config: StreamConfig,
    market_kind: MarketKind,
    throttler: Option<Arc<Throttler>>,
    diff_tx: mpsc::Sender<BackpackMessage>,
    diff_rx: Mutex<mpsc::Receiver<BackpackMessage>>,
    trade_tx: mpsc::Sender<BackpackMessage>,
    trade_rx: Mutex<mpsc::Receiver<BackpackMessage>>,
    funding_tx: mpsc::Sender<BackpackMessage>,
    funding_rx: Mutex<mpsc::Receiver<BackpackMessage>>,
}

impl<R: RestClient + Clone> MarketData<R> {
    pub fn new(
        rest: &R,
        ws_url: String,
        trading_pairs: Vec<String>,
        stream_config: StreamConfig,
    ) -> Self {
        let capacity = stream_config.queue_capacity.max(1);
        let (diff_tx, diff_rx) = mpsc::channel(capacity);
        let (trade_tx, trade_rx) = mpsc::channel(capacity);
        let (funding_tx, funding_rx) = mpsc::channel(capacity);

        Self {
            rest: BackpackRestClient::new(rest.clone()),
            ws_url,
            trading_pairs,
            stream_config,
            market_kind: MarketKind::Spot,
            throttler: None,
            diff_tx,
            diff_rx: Mutex::new(diff_rx),
            trade_tx,
            trade_rx: Mutex::new(trade_rx),
            funding_tx,
            funding_rx: Mutex::new(funding_rx),
        }
    }

    pub fn with_market_kind(mut self, market_kind: MarketKind) -> Self {
        self.market_kind = market_kind;
        self
    }

    pub fn market_kind(&self) -> MarketKind {
        self.market_kind
    }

    pub fn with_throttler(mut self, throttler: Arc<Throttler>) -> Self {
        self.throttler = Some(throttler);
        self
    }

    pub fn trading_pairs(&self) -> &[String] {
        &self.trading_pairs
    }

    /// `depth.<SYM>` and `trade.<SYM>` for every configured pair, plus
    /// `markPrice.<SYM>` on perpetual markets.
    pub fn stream_names(&self) -> Vec<String> {
        let channels: &[&str] = match self.market_kind {
            MarketKind::Spot => &[DEPTH_CHANNEL, TRADE_CHANNEL],
            MarketKind::Perpetual => &[DEPTH_CHANNEL, TRADE_CHANNEL, MARK_PRICE_CHANNEL],
        };
        self.trading_pairs
            .iter()
            .flat_map(|pair| {
                let symbol = trading_pair_to_exchange_symbol(pair);
                channels
                    .iter()
                    .map(move |channel| format!("{}{}", channel, symbol))
            })
            .collect()
    }

    fn require_perpetual(&self) -> Result<(), ExchangeError> {
        match self.market_kind {
            MarketKind::Perpetual => Ok(()),
            MarketKind::Spot => Err(ExchangeError::InvalidParameters(
                "funding info is only available on perpetual markets".to_string(),
            )),
        }
    }

    /// Drain one queue through `convert` until `output` closes.
    async fn drain<T, F>(
        queue: &Mutex<mpsc::Receiver<BackpackMessage>>,
        output: &mpsc::Sender<T>,
        convert: F,
    ) -> Result<(), ExchangeError>
    where
        T: Send,
        F: Fn(BackpackMessage) -> Option<Result<T, ExchangeError>> + Send,
    {
        let mut queue = queue.lock().await;
        loop {
            let message = tokio::select! {
                () = output.closed() => return Ok(()),
                message = queue.recv() => message,
            };
            let Some(message) = message else {
                return Ok(());
            };

            match convert(message) {
                Some(Ok(normalized)) => {
                    if output.send(normalized).await.is_err() {
                        return Ok(());
                    }
                }
                Some(Err(e)) => warn!(error = %e, "dropping malformed stream payload"),
                None => {}
            }
        }
    }
}

#[async_trait]
impl<R: RestClient + Clone> OrderBookDataSource for MarketData<R> {
    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn get_new_order_book(
        &self,
        trading_pair: &str,
    ) -> Result<OrderBookMessage, ExchangeError> {
        let symbol = trading_pair_to_exchange_symbol(trading_pair);
        let depth = self.rest.get_depth(&symbol).await?;
        let snapshot =
            normalize_snapshot(&depth, trading_pair, chrono::Utc::now().timestamp_millis())?;
        debug!(
            update_id = snapshot.update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "order book snapshot"
        );
        Ok(OrderBookMessage::Snapshot(snapshot))
    }

    #[instrument(skip(self, cancel), fields(exchange = EXCHANGE_NAME, pairs = self.trading_pairs.len()))]
    async fn listen_for_subscriptions(
        &self,
        cancel: CancellationToken,
    ) -> Result<(), ExchangeError> {
        let streams = self.stream_names();
        if streams.is_empty() {
            return Err(ExchangeError::InvalidParameters(
                "no trading pairs configured for the public stream".to_string(),
            ));
        }

        let mut router = ChannelRouter::new();
        router.route_to(DEPTH_CHANNEL, self.diff_tx.clone());
        router.route_to(TRADE_CHANNEL, self.trade_tx.clone());
        if self.market_kind == MarketKind::Perpetual {
            router.route_to(MARK_PRICE_CHANNEL, self.funding_tx.clone());
        }

        let session = TungsteniteWs::new(
            self.ws_url.clone(),
            EXCHANGE_NAME.to_string(),
            BackpackCodec::new(),
        );
        let mut consumer = StreamConsumer::new(
            "backpack-public",
            session,
            streams,
            router,
            self.stream_config.clone(),
        );
        if let Some(throttler) = &self.throttler {
            consumer = consumer.with_throttler(throttler.clone());
        }

        consumer.run(cancel).await
    }

    async fn listen_for_order_book_diffs(
        &self,
        output: mpsc::Sender<OrderBookMessage>,
    ) -> Result<(), ExchangeError> {
        Self::drain(&self.diff_rx, &output, |message| match message {
            BackpackMessage::Depth { event, .. } => {
                let pair = exchange_symbol_to_trading_pair(&event.symbol);
                Some(normalize_diff(&event, &pair).map(OrderBookMessage::Diff))
            }
            _ => None,
        })
        .await
    }

    async fn listen_for_trades(
        &self,
        output: mpsc::Sender<OrderBookMessage>,
    ) -> Result<(), ExchangeError> {
        Self::drain(&self.trade_rx, &output, |message| match message {
            BackpackMessage::Trade { event, .. } => {
                let pair = exchange_symbol_to_trading_pair(&event.symbol);
                Some(normalize_trade(&event, &pair).map(OrderBookMessage::Trade))
            }
            _ => None,
        })
        .await
    }

    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn get_last_traded_prices(
        &self,
        trading_pairs: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let tickers = self.rest.get_tickers().await?;
        let mut prices = HashMap::with_capacity(trading_pairs.len());

        for ticker in tickers {
            let pair = exchange_symbol_to_trading_pair(&ticker.symbol);
            if !trading_pairs.contains(&pair) {
                continue;
            }
            match Decimal::from_str(&ticker.last_price) {
                Ok(price) => {
                    prices.insert(pair, price);
                }
                Err(e) => warn!(symbol = %ticker.symbol, error = %e, "bad last price"),
            }
        }

        Ok(prices)
    }

    async fn fetch_trading_pairs(&self) -> Result<Vec<String>, ExchangeError> {
        let markets = self.rest.get_markets().await?;
        Ok(markets
            .iter()
            .filter(|m| is_tradable(m, self.market_kind))
            .map(market_trading_pair)
            .collect())
    }
}

#[async_trait]
impl<R: RestClient + Clone> FundingInfoSource for MarketData<R> {
    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn get_funding_info(&self, trading_pair: &str) -> Result<FundingInfo, ExchangeError> {
        self.require_perpetual()?;
        let symbol = trading_pair_to_exchange_symbol(trading_pair);
        let entries = self.rest.get_mark_prices(Some(&symbol)).await?;
        let entry = entries
            .iter()
            .find(|e| e.symbol == symbol)
            .ok_or_else(|| {
                ExchangeError::InvalidParameters(format!("no mark price for {}", trading_pair))
            })?;
        let info = funding_info_from_mark_price(entry, chrono::Utc::now().timestamp_millis())?;
        debug!(rate = %info.rate, next = info.next_funding_timestamp_ms, "funding info");
        Ok(info)
    }

    async fn listen_for_funding_info(
        &self,
        output: mpsc::Sender<FundingInfo>,
    ) -> Result<(), ExchangeError> {
        self.require_perpetual()?;
        Self::drain(&self.funding_rx, &output, |message| match message {
            BackpackMessage::MarkPrice { event, .. } => Some(funding_info_from_event(&event)),
            _ => None,
        })
        .await
    }
}
