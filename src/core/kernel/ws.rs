use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

/// WebSocket session trait - pure transport layer
///
/// `connect` may be called again after a failure or `close`; each call starts a
/// fresh connection with no subscriptions.
#[async_trait]
pub trait WsSession<C: WsCodec>: Send + Sync {
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Next data frame. Pings are answered and skipped here.
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    async fn close(&mut self) -> Result<(), ExchangeError>;

    fn is_connected(&self) -> bool;

    /// Subscribe to streams using the codec
    async fn subscribe(
        &mut self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<(), ExchangeError>;

    /// Unsubscribe from streams using the codec
    async fn unsubscribe(
        &mut self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<(), ExchangeError>;

    /// Get the next decoded message
    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>>;

    /// When the transport last read any frame, pings and filtered frames included.
    fn last_frame_at(&self) -> Option<Instant> {
        None
    }
}

/// Tungstenite-based WebSocket implementation
pub struct TungsteniteWs<C: WsCodec> {
    url: String,
    write: Option<SplitSink<WsStream, Message>>,
    read: Option<SplitStream<WsStream>>,
    connected: bool,
    last_frame_at: Option<Instant>,
    exchange_name: String,
    codec: C,
    config: WsConfig,
}

impl<C: WsCodec> TungsteniteWs<C> {
    /// Create a new WebSocket session with the specified codec
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    /// * `codec` - The codec to handle message encoding/decoding
    pub fn new(url: String, exchange_name: String, codec: C) -> Self {
        Self {
            url,
            write: None,
            read: None,
            connected: false,
            last_frame_at: None,
            exchange_name,
            codec,
            config: WsConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}

#[async_trait]
impl<C: WsCodec> WsSession<C> for TungsteniteWs<C> {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;
        self.last_frame_at = None;
        debug!("websocket connected");

        Ok(())
    }

    #[instrument(skip(self, msg), fields(exchange = %self.exchange_name))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::WebSocketError(
                "WebSocket not connected".to_string(),
            ));
        }

        let write = self.write.as_mut().ok_or_else(|| {
            ExchangeError::WebSocketError("WebSocket write stream not available".to_string())
        })?;

        if let Err(e) = write.send(msg).await {
            self.connected = false;
            return Err(ExchangeError::WebSocketError(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }

        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        if !self.connected {
            return Some(Err(ExchangeError::WebSocketError(
                "WebSocket not connected".to_string(),
            )));
        }

        loop {
            let frame = self.read.as_mut()?.next().await;
            if matches!(frame, Some(Ok(_))) {
                self.last_frame_at = Some(Instant::now());
            }
            match frame {
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.send_raw(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(message @ Message::Close(_))) => {
                    self.connected = false;
                    return Some(Ok(message));
                }
                Some(Ok(message)) => return Some(Ok(message)),
                Some(Err(e)) => {
                    self.connected = false;
                    return Some(Err(ExchangeError::WebSocketError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.connected = false;
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            if let Err(e) = write.send(Message::Close(None)).await {
                debug!("close frame not delivered: {}", e);
            }
            let _ = write.close().await;
        }
        self.connected = false;
        self.write = None;
        self.read = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    #[instrument(skip(self, streams), fields(exchange = %self.exchange_name, stream_count = streams.len()))]
    async fn subscribe(
        &mut self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<(), ExchangeError> {
        if streams.is_empty() {
            return Ok(());
        }

        let message = self.codec.encode_subscription(streams)?;
        self.send_raw(message).await
    }

    #[instrument(skip(self, streams), fields(exchange = %self.exchange_name, stream_count = streams.len()))]
    async fn unsubscribe(
        &mut self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<(), ExchangeError> {
        if streams.is_empty() {
            return Ok(());
        }

        let message = self.codec.encode_unsubscription(streams)?;
        self.send_raw(message).await
    }

    fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    async fn next_message(&mut self) -> Option<Result<C::Message, ExchangeError>> {
        loop {
            match self.next_raw().await? {
                Ok(Message::Close(frame)) => {
                    return Some(Err(ExchangeError::WebSocketError(format!(
                        "Connection closed by peer: {:?}",
                        frame
                    ))));
                }
                Ok(raw_msg) => match self.codec.decode_message(raw_msg) {
                    Ok(Some(decoded)) => return Some(Ok(decoded)),
                    Ok(None) => {}
                    Err(e) => warn!("Failed to decode WebSocket frame: {}", e),
                },
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
