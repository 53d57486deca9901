use crate::core::config::{ExchangeConfig, DEFAULT_WINDOW_MS, MAX_WINDOW_MS};
use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::{Ed25519Signer, SignatureResult, Signer};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

pub const HEADER_API_KEY: &str = "X-API-KEY";
pub const HEADER_SIGNATURE: &str = "X-SIGNATURE";
pub const HEADER_TIMESTAMP: &str = "X-TIMESTAMP";
pub const HEADER_WINDOW: &str = "X-WINDOW";

/// Operation label the exchange expects at the head of every signed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    AccountQuery,
    BalanceQuery,
    CollateralQuery,
    OrderQuery,
    OrderQueryAll,
    OrderExecute,
    OrderCancel,
    OrderCancelAll,
    FillHistoryQueryAll,
    DepositQueryAll,
    WithdrawalQueryAll,
    PositionQuery,
    FundingHistoryQueryAll,
    PnlHistoryQueryAll,
    Subscribe,
}

impl Instruction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccountQuery => "accountQuery",
            Self::BalanceQuery => "balanceQuery",
            Self::CollateralQuery => "collateralQuery",
            Self::OrderQuery => "orderQuery",
            Self::OrderQueryAll => "orderQueryAll",
            Self::OrderExecute => "orderExecute",
            Self::OrderCancel => "orderCancel",
            Self::OrderCancelAll => "orderCancelAll",
            Self::FillHistoryQueryAll => "fillHistoryQueryAll",
            Self::DepositQueryAll => "depositQueryAll",
            Self::WithdrawalQueryAll => "withdrawalQueryAll",
            Self::PositionQuery => "positionQuery",
            Self::FundingHistoryQueryAll => "fundingHistoryQueryAll",
            Self::PnlHistoryQueryAll => "pnlHistoryQueryAll",
            Self::Subscribe => "subscribe",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the instruction from verb and path, most specific suffix first.
///
/// Unknown paths fall back to `accountQuery` and are logged.
pub fn instruction_for(method: &str, path: &str) -> Instruction {
    let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
    let is = |m: &str| method.eq_ignore_ascii_case(m);

    if path.ends_with("/capital/collateral") {
        Instruction::CollateralQuery
    } else if path.ends_with("/capital") {
        Instruction::BalanceQuery
    } else if path.ends_with("/orders") {
        if is("DELETE") {
            Instruction::OrderCancelAll
        } else {
            Instruction::OrderQueryAll
        }
    } else if path.ends_with("/order") {
        if is("POST") {
            Instruction::OrderExecute
        } else if is("DELETE") {
            Instruction::OrderCancel
        } else {
            Instruction::OrderQuery
        }
    } else if path.ends_with("/fills") {
        Instruction::FillHistoryQueryAll
    } else if path.ends_with("/deposits") {
        Instruction::DepositQueryAll
    } else if path.ends_with("/withdrawals") {
        Instruction::WithdrawalQueryAll
    } else if path.ends_with("/positions") || path.ends_with("/position") {
        Instruction::PositionQuery
    } else if path.ends_with("/history/funding") {
        Instruction::FundingHistoryQueryAll
    } else if path.ends_with("/history/pnl") {
        Instruction::PnlHistoryQueryAll
    } else if path.ends_with("/account") {
        Instruction::AccountQuery
    } else {
        warn!(method, path, "no instruction registered for path, signing as accountQuery");
        Instruction::AccountQuery
    }
}

/// Signs REST calls and private stream subscriptions for one key pair.
///
/// Holds no per-request state, so one instance serves concurrent calls.
#[derive(Debug)]
pub struct BackpackAuth {
    api_key: String,
    signer: Ed25519Signer,
    window_ms: u64,
}

impl BackpackAuth {
    pub fn new(api_key: &str, secret_key: &str) -> Result<Self, ExchangeError> {
        let signer = Ed25519Signer::new(secret_key)?;
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(ExchangeError::ConfigurationError(
                "API key must not be empty".to_string(),
            ));
        }
        if api_key != signer.verifying_key_base64() {
            warn!("API key does not match the public key derived from the secret");
        }

        Ok(Self {
            api_key,
            signer,
            window_ms: DEFAULT_WINDOW_MS,
        })
    }

    pub fn from_config(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        Self::new(config.api_key(), config.secret_key())?.with_window(config.window_ms)
    }

    pub fn with_window(mut self, window_ms: u64) -> Result<Self, ExchangeError> {
        if window_ms == 0 || window_ms > MAX_WINDOW_MS {
            return Err(ExchangeError::ConfigurationError(format!(
                "window must be within 1..={} ms, got {}",
                MAX_WINDOW_MS, window_ms
            )));
        }
        self.window_ms = window_ms;
        Ok(self)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn signer(&self) -> &Ed25519Signer {
        &self.signer
    }

    /// Headers for one REST call. `params` are every signed key/value pair.
    pub fn authenticate_rest<K, V>(
        &self,
        method: &str,
        path: &str,
        params: &[(K, V)],
        timestamp: u64,
    ) -> HashMap<String, String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let instruction = instruction_for(method, path);
        let message = Ed25519Signer::canonical_string(
            instruction.as_str(),
            params,
            timestamp,
            self.window_ms,
        );

        HashMap::from([
            (HEADER_API_KEY.to_string(), self.api_key.clone()),
            (HEADER_SIGNATURE.to_string(), self.signer.sign(&message)),
            (HEADER_TIMESTAMP.to_string(), timestamp.to_string()),
            (HEADER_WINDOW.to_string(), self.window_ms.to_string()),
        ])
    }

    /// Signed `SUBSCRIBE` frame for private channels.
    pub fn authenticate_ws(&self, streams: &[impl AsRef<str>], timestamp: u64) -> Value {
        let message = Ed25519Signer::canonical_string::<&str, &str>(
            Instruction::Subscribe.as_str(),
            &[],
            timestamp,
            self.window_ms,
        );
        let params: Vec<&str> = streams.iter().map(AsRef::as_ref).collect();

        json!({
            "method": "SUBSCRIBE",
            "params": params,
            "signature": [
                self.api_key,
                self.signer.sign(&message),
                timestamp.to_string(),
                self.window_ms.to_string(),
            ],
        })
    }
}

impl Signer for BackpackAuth {
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let mut params: Vec<(String, String)> = query_params
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        params.extend(body_params(body)?);

        Ok(self.authenticate_rest(method, endpoint, &params, timestamp))
    }
}

/// Top-level scalar fields of a JSON object body, stringified the way the exchange signs them.
fn body_params(body: &[u8]) -> Result<Vec<(String, String)>, ExchangeError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value = serde_json::from_slice(body).map_err(|e| {
        ExchangeError::SerializationError(format!("Signed body is not valid JSON: {}", e))
    })?;

    let Value::Object(fields) = value else {
        return Ok(Vec::new());
    };

    Ok(fields
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                // nested
                _ => return None,
            };
            Some((key, text))
        })
        .collect())
}

/// Current epoch milliseconds for signing.
pub fn timestamp_ms() -> Result<u64, ExchangeError> {
    u64::try_from(chrono::Utc::now().timestamp_millis())
        .map_err(|e| ExchangeError::Other(format!("System clock before epoch: {}", e)))
}
