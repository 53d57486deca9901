use crate::core::errors::ExchangeError;
use crate::core::kernel::{ChannelMessage, WsCodec};
use crate::exchanges::backpack::auth::{timestamp_ms, BackpackAuth};
use crate::exchanges::backpack::types::{
    BackpackDepthEvent, BackpackMarkPriceEvent, BackpackOrderUpdateEvent, BackpackStreamEnvelope,
    BackpackTradeEvent,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

/// Typed frames from the Backpack stream endpoint
#[derive(Debug, Clone)]
pub enum BackpackMessage {
    Depth {
        stream: String,
        event: BackpackDepthEvent,
    },
    Trade {
        stream: String,
        event: BackpackTradeEvent,
    },
    OrderUpdate {
        stream: String,
        event: BackpackOrderUpdateEvent,
    },
    MarkPrice {
        stream: String,
        event: BackpackMarkPriceEvent,
    },
    /// Exchange-reported error, usually a rejected subscription.
    Error(Value),
    Unknown {
        stream: Option<String>,
        data: Value,
    },
}

impl ChannelMessage for BackpackMessage {
    fn channel(&self) -> Option<&str> {
        match self {
            Self::Depth { stream, .. }
            | Self::Trade { stream, .. }
            | Self::OrderUpdate { stream, .. }
            | Self::MarkPrice { stream, .. } => Some(stream),
            Self::Unknown { stream, .. } => stream.as_deref(),
            Self::Error(_) => None,
        }
    }
}

fn is_private(stream: &str) -> bool {
    stream.starts_with("account.")
}

/// Backpack WebSocket codec. Private channels are signed with `auth`.
#[derive(Debug, Clone, Default)]
pub struct BackpackCodec {
    auth: Option<Arc<BackpackAuth>>,
}

impl BackpackCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(auth: Arc<BackpackAuth>) -> Self {
        Self { auth: Some(auth) }
    }

    fn build_message(
        &self,
        method: &str,
        streams: &[impl AsRef<str>],
    ) -> Result<Value, ExchangeError> {
        let params: Vec<&str> = streams.iter().map(AsRef::as_ref).collect();

        if !params.iter().any(|s| is_private(s)) {
            return Ok(json!({ "method": method, "params": params }));
        }

        let auth = self
            .auth
            .as_ref()
            .ok_or(ExchangeError::AuthenticationRequired)?;
        let mut message = auth.authenticate_ws(&params, timestamp_ms()?);
        message["method"] = Value::String(method.to_string());
        Ok(message)
    }

    fn parse_envelope(&self, value: Value) -> Result<BackpackMessage, ExchangeError> {
        if let Some(error) = value.get("error") {
            warn!(error = %error, "exchange reported stream error");
            return Ok(BackpackMessage::Error(error.clone()));
        }

        let Ok(envelope) = serde_json::from_value::<BackpackStreamEnvelope>(value.clone()) else {
            return Ok(BackpackMessage::Unknown {
                stream: None,
                data: value,
            });
        };

        let decode_err = |e: serde_json::Error| {
            ExchangeError::DeserializationError(format!(
                "Bad {} payload: {}",
                envelope.stream, e
            ))
        };

        let message = match envelope.data.get("e").and_then(Value::as_str) {
            Some("depth") => BackpackMessage::Depth {
                event: serde_json::from_value(envelope.data.clone()).map_err(decode_err)?,
                stream: envelope.stream.clone(),
            },
            Some("trade") => BackpackMessage::Trade {
                event: serde_json::from_value(envelope.data.clone()).map_err(decode_err)?,
                stream: envelope.stream.clone(),
            },
            Some("markPrice") => BackpackMessage::MarkPrice {
                event: serde_json::from_value(envelope.data.clone()).map_err(decode_err)?,
                stream: envelope.stream.clone(),
            },
            Some(kind) if kind.starts_with("order") || kind.starts_with("trigger") => {
                BackpackMessage::OrderUpdate {
                    event: serde_json::from_value(envelope.data.clone()).map_err(decode_err)?,
                    stream: envelope.stream.clone(),
                }
            }
            _ => BackpackMessage::Unknown {
                stream: Some(envelope.stream.clone()),
                data: envelope.data.clone(),
            },
        };
        Ok(message)
    }
}

impl WsCodec for BackpackCodec {
    type Message = BackpackMessage;

    fn encode_subscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError> {
        Ok(Message::Text(
            self.build_message("SUBSCRIBE", streams)?.to_string(),
        ))
    }

    fn encode_unsubscription(
        &self,
        streams: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError> {
        Ok(Message::Text(
            self.build_message("UNSUBSCRIBE", streams)?.to_string(),
        ))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError> {
        match message {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).map_err(|e| {
                    ExchangeError::DeserializationError(format!("JSON parse error: {}", e))
                })?;
                self.parse_envelope(value).map(Some)
            }
            _ => Ok(None),
        }
    }
}
