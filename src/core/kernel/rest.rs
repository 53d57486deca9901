use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::Signer;
use crate::core::kernel::throttle::Throttler;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{instrument, trace, warn};

/// REST client trait for making HTTP requests
///
/// Every call is throttled by its endpoint path and, when `authenticated`, signed by
/// the configured [`Signer`] before it leaves the process.
#[async_trait]
pub trait RestClient: Send + Sync {
    /// GET with query parameters, deserialized into `T`
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError>;

    /// POST with a JSON body, deserialized into `T`
    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
        authenticated: bool,
    ) -> Result<T, ExchangeError>;

    /// DELETE with a JSON body, deserialized into `T`
    async fn delete_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
        authenticated: bool,
    ) -> Result<T, ExchangeError>;

    /// Arbitrary method with optional query parameters and body
    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<T, ExchangeError>;
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Retries for idempotent GETs that fail with a transient error
    pub max_retries: u32,
    /// User agent string to include in requests
    pub user_agent: String,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            max_retries: 3,
            user_agent: concat!("backpack-connector/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    throttler: Option<Arc<Throttler>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
            throttler: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Share a throttler with other clients of the same exchange
    pub fn with_throttler(mut self, throttler: Arc<Throttler>) -> Self {
        self.throttler = Some(throttler);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| {
                ExchangeError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
            throttler: self.throttler,
        })
    }
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    throttler: Option<Arc<Throttler>>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .field("has_throttler", &self.throttler.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    pub fn config(&self) -> &RestClientConfig {
        &self.config
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, ExchangeError> {
        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if !status.is_success() {
            return Err(ExchangeError::ApiError {
                code: i32::from(status.as_u16()),
                message: response_text,
            });
        }

        if response_text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_text).map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse JSON response: {}", e))
        })
    }

    #[instrument(skip(self, query_params, body), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint))]
    async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        authenticated: bool,
    ) -> Result<Value, ExchangeError> {
        if let Some(throttler) = &self.throttler {
            throttler.acquire(endpoint).await;
        }

        let url = self.build_url(endpoint);
        let mut request = self.client.request(method.clone(), &url);

        if !query_params.is_empty() {
            request = request.query(query_params);
        }

        if authenticated {
            let signer = self.signer.as_ref().ok_or(ExchangeError::AuthenticationRequired)?;
            let timestamp = u64::try_from(chrono::Utc::now().timestamp_millis())
                .map_err(|e| ExchangeError::Other(format!("System clock before epoch: {}", e)))?;
            let headers =
                signer.sign_request(method.as_str(), endpoint, query_params, body, timestamp)?;

            for (key, value) in headers {
                request = request.header(key, value);
            }
        }

        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_vec());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Request failed: {}", e)))?;

        self.handle_response(response).await
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<Value, ExchangeError> {
        let body_bytes = match body {
            Some(Value::Null) | None => Vec::new(),
            Some(value) => serde_json::to_vec(value).map_err(|e| {
                ExchangeError::SerializationError(format!("Failed to serialize request body: {}", e))
            })?,
        };

        if method != Method::GET || self.config.max_retries == 0 {
            return self
                .make_request(method, endpoint, query_params, &body_bytes, authenticated)
                .await;
        }

        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.config.max_retries as usize);

        RetryIf::spawn(
            strategy,
            || self.make_request(Method::GET, endpoint, query_params, &body_bytes, authenticated),
            |e: &ExchangeError| {
                let retry = e.is_transient();
                if retry {
                    warn!(endpoint, error = %e, "transient REST failure, retrying");
                }
                retry
            },
        )
        .await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ExchangeError> {
    serde_json::from_value(value).map_err(|e| {
        ExchangeError::DeserializationError(format!("Failed to deserialize JSON: {}", e))
    })
}

#[async_trait]
impl RestClient for ReqwestRest {
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.send(Method::GET, endpoint, query_params, None, authenticated)
            .await
            .and_then(decode)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.send(Method::POST, endpoint, &[], Some(body), authenticated)
            .await
            .and_then(decode)
    }

    async fn delete_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.send(Method::DELETE, endpoint, &[], Some(body), authenticated)
            .await
            .and_then(decode)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: Option<&Value>,
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        self.send(method, endpoint, query_params, body, authenticated)
            .await
            .and_then(decode)
    }
}
