//! Reconnecting stream consumer.
//!
//! One long-lived loop owns a [`WsSession`]: it connects, replays every tracked
//! subscription, and routes decoded frames into per-channel queues by channel-name
//! prefix. Transport failures and stale connections are recovered locally with
//! capped exponential backoff; the loop only returns when its cancellation token fires.

use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{ChannelMessage, WsCodec};
use crate::core::kernel::throttle::Throttler;
use crate::core::kernel::ws::WsSession;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribing,
    Streaming,
}

/// `delay(n) = min(base * factor^n, max)`
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(consecutive_failures);
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub backoff: BackoffPolicy,
    /// How often the watchdog checks for silence.
    pub health_check_interval: Duration,
    /// Silence longer than this forces a reconnect.
    pub connection_timeout: Duration,
    pub connect_timeout: Duration,
    /// Capacity of each per-channel queue; a full queue applies backpressure.
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            health_check_interval: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 1024,
        }
    }
}

/// Loop-local health bookkeeping. Only the consumer loop mutates it.
#[derive(Debug)]
struct ConnectionHealth {
    last_message_received: Instant,
    consecutive_failures: u32,
}

impl ConnectionHealth {
    fn new() -> Self {
        Self {
            last_message_received: Instant::now(),
            consecutive_failures: 0,
        }
    }

    fn touch(&mut self) {
        self.last_message_received = Instant::now();
    }

    /// Transport traffic the loop never saw (pings, filtered frames). Returns `true` if it was newer.
    fn observe(&mut self, seen_at: Instant) -> bool {
        if seen_at <= self.last_message_received {
            return false;
        }
        self.last_message_received = seen_at;
        true
    }

    fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.touch();
    }

    fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    fn is_stale(&self, connection_timeout: Duration) -> bool {
        self.last_message_received.elapsed() > connection_timeout
    }
}

/// Read-only view of a running consumer, safe to share across tasks.
#[derive(Debug, Clone)]
pub struct StreamMonitor {
    state: watch::Receiver<ConnectionState>,
    last_recv_ms: Arc<AtomicI64>,
    connections: Arc<AtomicU32>,
    failures: Arc<AtomicU32>,
}

impl StreamMonitor {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the consumer reaches `target`.
    pub async fn wait_for(&mut self, target: ConnectionState) -> Result<(), ExchangeError> {
        self.state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| ExchangeError::Other("stream consumer dropped".to_string()))
    }

    /// Epoch milliseconds of the last received frame, 0 before the first one.
    pub fn last_recv_time_ms(&self) -> i64 {
        self.last_recv_ms.load(Ordering::Relaxed)
    }

    /// Number of successful connects, including the first.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Failed sessions since the last successful connect.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Fans decoded frames out to queues keyed by channel-name prefix.
pub struct ChannelRouter<M> {
    routes: Vec<(String, mpsc::Sender<M>)>,
}

impl<M> Default for ChannelRouter<M> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<M: Send + 'static> ChannelRouter<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for channels starting with `prefix`. First match wins.
    pub fn route(&mut self, prefix: impl Into<String>, capacity: usize) -> mpsc::Receiver<M> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.routes.push((prefix.into(), tx));
        rx
    }

    /// Register an existing queue, so one receiver can outlive many consumer runs.
    pub fn route_to(&mut self, prefix: impl Into<String>, sender: mpsc::Sender<M>) {
        self.routes.push((prefix.into(), sender));
    }

    /// Returns `false` when no live route accepted the message.
    async fn dispatch(&self, channel: &str, message: M) -> bool {
        let Some((prefix, tx)) = self
            .routes
            .iter()
            .find(|(prefix, _)| channel.starts_with(prefix.as_str()))
        else {
            trace!(channel, "no route for channel");
            return false;
        };

        if tx.send(message).await.is_err() {
            debug!(channel, prefix = %prefix, "route receiver dropped");
            return false;
        }
        true
    }
}

pub struct StreamConsumer<C: WsCodec, W: WsSession<C>> {
    name: String,
    session: W,
    subscriptions: Vec<String>,
    router: ChannelRouter<C::Message>,
    config: StreamConfig,
    health: ConnectionHealth,
    throttler: Option<Arc<Throttler>>,
    state_tx: watch::Sender<ConnectionState>,
    monitor: StreamMonitor,
    _codec: PhantomData<C>,
}

impl<C: WsCodec, W: WsSession<C>> StreamConsumer<C, W> {
    pub fn new(
        name: impl Into<String>,
        session: W,
        subscriptions: Vec<String>,
        router: ChannelRouter<C::Message>,
        config: StreamConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let monitor = StreamMonitor {
            state: state_rx,
            last_recv_ms: Arc::new(AtomicI64::new(0)),
            connections: Arc::new(AtomicU32::new(0)),
            failures: Arc::new(AtomicU32::new(0)),
        };

        Self {
            name: name.into(),
            session,
            subscriptions,
            router,
            config,
            health: ConnectionHealth::new(),
            throttler: None,
            state_tx,
            monitor,
            _codec: PhantomData,
        }
    }

    /// Throttle subscribe frames against the `WEB_SOCKET` pool.
    pub fn with_throttler(mut self, throttler: Arc<Throttler>) -> Self {
        self.throttler = Some(throttler);
        self
    }

    pub fn monitor(&self) -> StreamMonitor {
        self.monitor.clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.health.consecutive_failures
    }

    /// Run until `cancel` fires. The socket is closed before this returns.
    ///
    /// Each retry sleeps `backoff.delay(failures_so_far)`, so the first one waits `backoff.base`.
    #[instrument(skip(self, cancel), fields(stream = %self.name, subscriptions = self.subscriptions.len()))]
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ExchangeError> {
        loop {
            let failure = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                error = self.run_session() => Some(error),
            };

            let Some(error) = failure else {
                self.shutdown().await;
                return Ok(());
            };

            if let Err(e) = self.session.close().await {
                debug!("close after failure: {}", e);
            }
            self.set_state(ConnectionState::Disconnected);

            let delay = self.config.backoff.delay(self.health.consecutive_failures);
            let attempt = self.health.record_failure();
            self.monitor.failures.store(attempt, Ordering::Relaxed);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "stream connection lost, reconnecting"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.shutdown().await;
                    return Ok(());
                }
                () = sleep(delay) => {}
            }
        }
    }

    /// One connection lifetime. Only returns on failure.
    async fn run_session(&mut self) -> ExchangeError {
        self.set_state(ConnectionState::Connecting);
        match timeout(self.config.connect_timeout, self.session.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return e,
            Err(_) => {
                return ExchangeError::ConnectionTimeout(format!(
                    "connect did not finish within {:?}",
                    self.config.connect_timeout
                ))
            }
        }

        self.health.reset();
        self.monitor.failures.store(0, Ordering::Relaxed);
        let connections = self.monitor.connections.fetch_add(1, Ordering::Relaxed) + 1;
        info!(connections, "stream connected");

        self.set_state(ConnectionState::Subscribing);
        for stream in &self.subscriptions {
            if let Some(throttler) = &self.throttler {
                throttler.acquire("WEB_SOCKET").await;
            }
            if let Err(e) = self.session.subscribe(&[stream.as_str()]).await {
                return e;
            }
            debug!(stream = %stream, "subscribe sent");
        }

        self.set_state(ConnectionState::Streaming);
        let period = self.config.health_check_interval;
        let mut watchdog = interval_at(Instant::now() + period, period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = self.session.next_message() => match frame {
                    Some(Ok(message)) => {
                        self.health.touch();
                        self.monitor
                            .last_recv_ms
                            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
                        if let Some(channel) = message.channel().map(str::to_owned) {
                            self.router.dispatch(&channel, message).await;
                        }
                    }
                    Some(Err(e)) => return e,
                    None => {
                        return ExchangeError::WebSocketError("stream ended by peer".to_string())
                    }
                },
                _ = watchdog.tick() => {
                    if let Some(seen_at) = self.session.last_frame_at() {
                        if self.health.observe(seen_at) {
                            let age_ms = i64::try_from(seen_at.elapsed().as_millis()).unwrap_or(0);
                            self.monitor.last_recv_ms.fetch_max(
                                chrono::Utc::now().timestamp_millis() - age_ms,
                                Ordering::Relaxed,
                            );
                        }
                    }
                    if self.health.is_stale(self.config.connection_timeout) {
                        return ExchangeError::ConnectionTimeout(format!(
                            "no frames for more than {:?}",
                            self.config.connection_timeout
                        ));
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.session.close().await {
            debug!("close on cancellation: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
        info!("stream consumer cancelled");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio_tungstenite::tungstenite::Message;

    #[derive(Debug, Clone, PartialEq)]
    struct Frame {
        channel: String,
        seq: u32,
    }

    impl ChannelMessage for Frame {
        fn channel(&self) -> Option<&str> {
            Some(&self.channel)
        }
    }

    struct FrameCodec;

    impl WsCodec for FrameCodec {
        type Message = Frame;

        fn encode_subscription(
            &self,
            streams: &[impl AsRef<str> + Send + Sync],
        ) -> Result<Message, ExchangeError> {
            Ok(Message::Text(streams[0].as_ref().to_string()))
        }

        fn encode_unsubscription(
            &self,
            streams: &[impl AsRef<str> + Send + Sync],
        ) -> Result<Message, ExchangeError> {
            self.encode_subscription(streams)
        }

        fn decode_message(&self, _message: Message) -> Result<Option<Frame>, ExchangeError> {
            Ok(None)
        }
    }

    /// Session whose connects fail a fixed number of times, then replays frames and goes silent.
    struct ScriptedSession {
        failures_left: u32,
        frames: VecDeque<Frame>,
        connects: Arc<AtomicU32>,
        subscribed: Vec<String>,
        closed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl WsSession<FrameCodec> for ScriptedSession {
        async fn connect(&mut self) -> Result<(), ExchangeError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(ExchangeError::NetworkError("refused".to_string()));
            }
            Ok(())
        }

        async fn send_raw(&mut self, _msg: Message) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
            None
        }

        async fn close(&mut self) -> Result<(), ExchangeError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn subscribe(
            &mut self,
            streams: &[impl AsRef<str> + Send + Sync],
        ) -> Result<(), ExchangeError> {
            self.subscribed
                .extend(streams.iter().map(|s| s.as_ref().to_string()));
            Ok(())
        }

        async fn unsubscribe(
            &mut self,
            _streams: &[impl AsRef<str> + Send + Sync],
        ) -> Result<(), ExchangeError> {
            Ok(())
        }

        async fn next_message(&mut self) -> Option<Result<Frame, ExchangeError>> {
            match self.frames.pop_front() {
                Some(frame) => Some(Ok(frame)),
                None => std::future::pending().await,
            }
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            backoff: BackoffPolicy {
                base: Duration::from_millis(5),
                factor: 2,
                max: Duration::from_millis(20),
            },
            health_check_interval: Duration::from_millis(20),
            connection_timeout: Duration::from_millis(60),
            connect_timeout: Duration::from_secs(1),
            queue_capacity: 16,
        }
    }

    fn frame(channel: &str, seq: u32) -> Frame {
        Frame {
            channel: channel.to_string(),
            seq,
        }
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let policy = BackoffPolicy::default();
        let delays: Vec<Duration> = (0..40).map(|n| policy.delay(n)).collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[5], Duration::from_secs(32));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(60)));
        assert_eq!(delays[39], Duration::from_secs(60));
    }

    #[test]
    fn test_health_reset_clears_failures() {
        let mut health = ConnectionHealth::new();
        assert_eq!(health.record_failure(), 1);
        assert_eq!(health.record_failure(), 2);
        health.reset();
        assert_eq!(health.consecutive_failures, 0);
        assert!(!health.is_stale(Duration::from_secs(1)));
    }

    #[test]
    fn test_observed_traffic_only_moves_forward() {
        let mut health = ConnectionHealth::new();
        let before = health.last_message_received;
        assert!(!health.observe(before - Duration::from_millis(5)));
        assert_eq!(health.last_message_received, before);
        assert!(health.observe(before + Duration::from_millis(5)));
        assert_eq!(health.last_message_received, before + Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_router_uses_prefixes_and_preserves_order() {
        let mut router = ChannelRouter::new();
        let mut depth = router.route("depth.", 8);
        let mut trades = router.route("trade.", 8);

        assert!(router.dispatch("depth.SOL_USDC", frame("depth.SOL_USDC", 1)).await);
        assert!(router.dispatch("trade.SOL_USDC", frame("trade.SOL_USDC", 2)).await);
        assert!(router.dispatch("depth.SOL_USDC", frame("depth.SOL_USDC", 3)).await);
        assert!(!router.dispatch("ticker.SOL_USDC", frame("ticker.SOL_USDC", 4)).await);

        assert_eq!(depth.recv().await.unwrap().seq, 1);
        assert_eq!(depth.recv().await.unwrap().seq, 3);
        assert_eq!(trades.recv().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_consumer_recovers_and_watchdog_forces_reconnect() {
        let connects = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicU32::new(0));
        let session = ScriptedSession {
            failures_left: 2,
            frames: VecDeque::from(vec![frame("depth.SOL_USDC", 1), frame("trade.SOL_USDC", 2)]),
            connects: connects.clone(),
            subscribed: Vec::new(),
            closed: closed.clone(),
        };

        let mut router = ChannelRouter::new();
        let mut depth = router.route("depth.", 8);
        let mut trades = router.route("trade.", 8);
        let mut consumer = StreamConsumer::new(
            "test",
            session,
            vec!["depth.SOL_USDC".to_string(), "trade.SOL_USDC".to_string()],
            router,
            fast_config(),
        );
        let mut monitor = consumer.monitor();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = consumer.run(task_cancel).await;
            (result, consumer)
        });

        assert_eq!(depth.recv().await.unwrap().seq, 1);
        assert_eq!(trades.recv().await.unwrap().seq, 2);

        // Silence after the scripted frames trips the watchdog and forces a second session.
        tokio::time::timeout(Duration::from_secs(2), async {
            while monitor.connection_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        monitor.wait_for(ConnectionState::Streaming).await.unwrap();

        cancel.cancel();
        let (result, consumer) = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert!(connects.load(Ordering::SeqCst) >= 4);
        assert!(closed.load(Ordering::SeqCst) >= 1);
        assert!(monitor.last_recv_time_ms() > 0);

        let subscribed = &consumer.session.subscribed;
        assert!(subscribed.len() >= 4);
        assert_eq!(subscribed[0], "depth.SOL_USDC");
        assert_eq!(subscribed[1], "trade.SOL_USDC");
        assert_eq!(subscribed[2], "depth.SOL_USDC");
    }
}
