use crate::core::{
    errors::ExchangeError,
    kernel::{ChannelRouter, StreamConfig, StreamConsumer, StreamMonitor, Throttler, TungsteniteWs},
    traits::UserStreamDataSource,
    types::UserStreamEvent,
};
use crate::exchanges::backpack::{
    auth::BackpackAuth,
    codec::{BackpackCodec, BackpackMessage},
    constants::{EXCHANGE_NAME, ORDER_UPDATE_CHANNEL},
    converters::{order_update_from_event, trade_update_from_event},
};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Private order and fill events over a signed `account.orderUpdate` subscription.
pub struct UserStream {
    auth: Arc<BackpackAuth>,
    ws_url: String,
    stream_config: StreamConfig,
    throttler: Option<Arc<Throttler>>,
    monitor: RwLock<Option<StreamMonitor>>,
}

impl UserStream {
    pub fn new(auth: Arc<BackpackAuth>, ws_url: String, stream_config: StreamConfig) -> Self {
        Self {
            auth,
            ws_url,
            stream_config,
            throttler: None,
            monitor: RwLock::new(None),
        }
    }

    pub fn with_throttler(mut self, throttler: Arc<Throttler>) -> Self {
        self.throttler = Some(throttler);
        self
    }

    pub fn monitor(&self) -> Option<StreamMonitor> {
        self.monitor.read().ok().and_then(|m| m.clone())
    }

    fn events_from(message: BackpackMessage) -> Vec<UserStreamEvent> {
        let BackpackMessage::OrderUpdate { event, .. } = message else {
            return Vec::new();
        };

        let mut events = vec![UserStreamEvent::Order(order_update_from_event(&event))];
        match trade_update_from_event(&event) {
            Ok(Some(trade)) => events.push(UserStreamEvent::Trade(trade)),
            Ok(None) => {}
            Err(e) => warn!(order_id = %event.order_id, error = %e, "unreadable fill in order update"),
        }
        events
    }
}

#[async_trait]
impl UserStreamDataSource for UserStream {
    #[instrument(skip(self, output, cancel), fields(exchange = EXCHANGE_NAME))]
    async fn listen_for_user_stream(
        &self,
        output: mpsc::Sender<UserStreamEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ExchangeError> {
        let mut router = ChannelRouter::new();
        let mut updates = router.route(ORDER_UPDATE_CHANNEL, self.stream_config.queue_capacity);

        let session = TungsteniteWs::new(
            self.ws_url.clone(),
            EXCHANGE_NAME.to_string(),
            BackpackCodec::with_auth(self.auth.clone()),
        );
        let mut consumer = StreamConsumer::new(
            "backpack-private",
            session,
            vec![ORDER_UPDATE_CHANNEL.to_string()],
            router,
            self.stream_config.clone(),
        );
        if let Some(throttler) = &self.throttler {
            consumer = consumer.with_throttler(throttler.clone());
        }
        if let Ok(mut slot) = self.monitor.write() {
            *slot = Some(consumer.monitor());
        }

        // A closed output stops the socket too.
        let stop = cancel.child_token();
        let forward = async {
            loop {
                let message = tokio::select! {
                    () = stop.cancelled() => break,
                    message = updates.recv() => message,
                };
                let Some(message) = message else { break };

                for event in Self::events_from(message) {
                    if output.send(event).await.is_err() {
                        stop.cancel();
                        return;
                    }
                }
            }
        };

        let (result, ()) = tokio::join!(consumer.run(stop.clone()), forward);
        result
    }

    fn last_recv_time(&self) -> i64 {
        self.monitor().map_or(0, |m| m.last_recv_time_ms())
    }
}
