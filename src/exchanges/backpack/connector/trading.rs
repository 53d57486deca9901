use crate::core::{
    errors::ExchangeError,
    kernel::RestClient,
    traits::OrderPlacer,
    types::{OrderRequest, OrderState, OrderUpdate, PlacedOrder, TradeUpdate},
};
use crate::exchanges::backpack::{
    constants::EXCHANGE_NAME,
    converters::{
        client_id_from_order_id, new_client_order_id, order_request_body,
        order_state_from_status, order_update_from_order, trade_update_from_fill,
        trading_pair_to_exchange_symbol,
    },
    normalizer::to_epoch_ms,
    rest::BackpackRestClient,
    types::BackpackCancelRequest,
};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// Trading implementation for Backpack
pub struct Trading<R: RestClient> {
    rest: BackpackRestClient<R>,
}

impl<R: RestClient> Trading<R> {
    pub fn new(rest: &R) -> Self
    where
        R: Clone,
    {
        Self {
            rest: BackpackRestClient::new(rest.clone()),
        }
    }

    /// Fresh framework order id, `BPX-` plus the exchange `clientId` it maps to.
    pub fn new_order_id(&self) -> String {
        new_client_order_id(chrono::Utc::now().timestamp_millis()).0
    }

    pub async fn cancel_all(&self, trading_pair: &str) -> Result<usize, ExchangeError> {
        let cancelled = self
            .rest
            .cancel_all_orders(&trading_pair_to_exchange_symbol(trading_pair))
            .await?;
        Ok(cancelled.len())
    }

    fn order_lookup(
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<BackpackCancelRequest, ExchangeError> {
        let symbol = trading_pair_to_exchange_symbol(trading_pair);
        match exchange_order_id {
            Some(order_id) => Ok(BackpackCancelRequest {
                symbol,
                order_id: Some(order_id.to_string()),
                client_id: None,
            }),
            None => {
                let client_id = client_id_from_order_id(client_order_id).ok_or_else(|| {
                    ExchangeError::InvalidParameters(format!(
                        "{} has no exchange id and is not a connector order id",
                        client_order_id
                    ))
                })?;
                Ok(BackpackCancelRequest {
                    symbol,
                    order_id: None,
                    client_id: Some(client_id),
                })
            }
        }
    }
}

#[async_trait]
impl<R: RestClient> OrderPlacer for Trading<R> {
    #[instrument(skip(self, order), fields(exchange = EXCHANGE_NAME, client_order_id = %order.client_order_id))]
    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder, ExchangeError> {
        let now = chrono::Utc::now().timestamp_millis();
        let client_id = client_id_from_order_id(&order.client_order_id).unwrap_or_else(|| {
            let (_, fallback) = new_client_order_id(now);
            warn!(client_id = fallback, "client order id carries no numeric part, assigning one");
            fallback
        });

        let body = order_request_body(order, client_id)?;
        let response = self.rest.execute_order(&body).await?;

        Ok(PlacedOrder {
            client_order_id: order.client_order_id.clone(),
            exchange_order_id: response.id,
            state: order_state_from_status(&response.status),
            timestamp_ms: response.created_at.map_or(now, to_epoch_ms),
        })
    }

    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn cancel_order(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<bool, ExchangeError> {
        let request = Self::order_lookup(trading_pair, client_order_id, exchange_order_id)?;
        match self.rest.cancel_order(&request).await {
            Ok(order) => Ok(order_state_from_status(&order.status) == OrderState::Canceled),
            Err(e) if e.is_order_not_found() => {
                debug!(error = %e, "order already gone on the exchange");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn request_order_status(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: Option<&str>,
    ) -> Result<OrderUpdate, ExchangeError> {
        let request = Self::order_lookup(trading_pair, client_order_id, exchange_order_id)?;
        let order = self
            .rest
            .get_order(
                &request.symbol,
                request.order_id.as_deref(),
                request.client_id,
            )
            .await?;

        let mut update = order_update_from_order(&order, chrono::Utc::now().timestamp_millis());
        update.trading_pair = trading_pair.to_string();
        update.client_order_id = Some(client_order_id.to_string());
        Ok(update)
    }

    #[instrument(skip(self), fields(exchange = EXCHANGE_NAME))]
    async fn all_trade_updates_for_order(
        &self,
        trading_pair: &str,
        client_order_id: &str,
        exchange_order_id: &str,
    ) -> Result<Vec<TradeUpdate>, ExchangeError> {
        let symbol = trading_pair_to_exchange_symbol(trading_pair);
        let fills = self
            .rest
            .get_fills(Some(&symbol), Some(exchange_order_id), None)
            .await?;

        fills
            .iter()
            .filter(|fill| fill.order_id == exchange_order_id)
            .map(|fill| trade_update_from_fill(fill, Some(client_order_id)))
            .collect()
    }
}
