use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Authentication required: no credentials configured")]
    AuthenticationRequired,

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timed out: {0}")]
    ConnectionTimeout(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(String),
}

impl ExchangeError {
    /// Whether the exchange rejected the call because the order does not exist.
    pub fn is_order_not_found(&self) -> bool {
        match self {
            Self::ApiError { code, message } => {
                *code == 404
                    || message.contains("INVALID_ORDER")
                    || message.contains("RESOURCE_NOT_FOUND")
            }
            _ => false,
        }
    }

    /// Whether the rejection points at local clock drift or an expired signing window.
    pub fn is_time_sync_related(&self) -> bool {
        let text = match self {
            Self::ApiError { message, .. } | Self::AuthError(message) => message.to_lowercase(),
            _ => return false,
        };
        text.contains("timestamp")
            || text.contains("clock skew")
            || text.contains("window")
            || (text.contains("time") && text.contains("sync"))
    }

    /// Errors the stream consumer and REST retry loop recover from locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_) | Self::ConnectionTimeout(_) | Self::WebSocketError(_)
        ) || matches!(self, Self::HttpError(e) if e.is_timeout() || e.is_connect())
    }
}
