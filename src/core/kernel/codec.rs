use crate::core::errors::ExchangeError;
use tokio_tungstenite::tungstenite::Message;

/// A decoded frame that knows which logical channel it belongs to.
pub trait ChannelMessage {
    /// Channel name such as `depth.SOL_USDC`, or `None` for control frames.
    fn channel(&self) -> Option<&str>;
}

/// Codec trait for handling exchange-specific WebSocket message encoding/decoding
///
/// This trait defines the contract for converting between raw WebSocket messages
/// and exchange-specific typed messages.
pub trait WsCodec: Send + Sync + 'static {
    /// The type representing parsed messages from this exchange
    type Message: ChannelMessage + Send + Sync + 'static;

    /// Encode a subscription request into a WebSocket message
    ///
    /// # Arguments
    /// * `streams` - The stream identifiers to subscribe to
    fn encode_subscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError>;

    /// Encode an unsubscription request into a WebSocket message
    fn encode_unsubscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError>;

    /// Decode a raw WebSocket message into a typed message
    ///
    /// Control messages (ping, pong, close) are handled at the transport level.
    ///
    /// # Returns
    /// - `Ok(Some(message))` - Successfully decoded message
    /// - `Ok(None)` - Message was ignored/filtered by codec
    /// - `Err(error)` - Failed to decode message
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError>;
}
