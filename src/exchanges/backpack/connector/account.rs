use crate::core::{
    config::MarketKind,
    errors::ExchangeError,
    kernel::RestClient,
    traits::AccountInfo,
    types::{Balance, TradingRule},
};
use crate::exchanges::backpack::{
    constants::EXCHANGE_NAME,
    converters::{merge_balances, parse_trading_rules},
    rest::BackpackRestClient,
    types::BackpackCollateral,
};
use async_trait::async_trait;
use tracing::{instrument, warn};

/// Account implementation for Backpack
pub struct Account<R: RestClient> {
    rest: BackpackRestClient<R>,
    market_kind: MarketKind,
}

impl<R: RestClient> Account<R> {
    /// Trading rules are reported for `market_kind` markets only.
    pub fn new(rest: &R, market_kind: MarketKind) -> Self
    where
        R: Clone,
    {
        Self {
            rest: BackpackRestClient::new(rest.clone()),
            market_kind,
        }
    }
}

#[async_trait]
impl<R: RestClient> AccountInfo for Account<R> {
    /// Spot capital merged with margin collateral.
    ///
    /// Accounts without margin get an API error from the collateral endpoint; that
    /// side is then treated as empty.
    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn get_account_balance(&self) -> Result<Vec<Balance>, ExchangeError> {
        let capital = self.rest.get_capital().await?;
        let collateral = match self.rest.get_collateral().await {
            Ok(collateral) => collateral,
            Err(e @ ExchangeError::ApiError { .. }) => {
                warn!(error = %e, "collateral unavailable, using spot capital only");
                BackpackCollateral::default()
            }
            Err(e) => return Err(e),
        };

        merge_balances(&capital, &collateral)
    }

    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn get_trading_rules(&self) -> Result<Vec<TradingRule>, ExchangeError> {
        let markets = self.rest.get_markets().await?;
        Ok(parse_trading_rules(&markets, self.market_kind))
    }
}
