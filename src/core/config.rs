use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::fmt;
use std::str::FromStr;

/// Default validity window for signed requests, in milliseconds.
pub const DEFAULT_WINDOW_MS: u64 = 5_000;
/// Largest window the exchange accepts.
pub const MAX_WINDOW_MS: u64 = 60_000;

/// Which family of markets one connector instance trades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    #[default]
    Spot,
    /// `BASE-QUOTE-PERP` pairs, with funding info and the `markPrice` stream.
    Perpetual,
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Spot => "spot",
            Self::Perpetual => "perpetual",
        })
    }
}

impl FromStr for MarketKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "perpetual" | "perp" => Ok(Self::Perpetual),
            other => Err(ConfigError::InvalidConfiguration(format!(
                "unknown market kind {:?}, expected spot or perpetual",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub api_key: Secret<String>,
    pub secret_key: Secret<String>,
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
    pub window_ms: u64,
    pub market_kind: MarketKind,
}

// Secrets never leave the process through serialization
impl Serialize for ExchangeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ExchangeConfig", 6)?;
        state.serialize_field("api_key", "[REDACTED]")?;
        state.serialize_field("secret_key", "[REDACTED]")?;
        state.serialize_field("base_url", &self.base_url)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.serialize_field("window_ms", &self.window_ms)?;
        state.serialize_field("market_kind", &self.market_kind)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ExchangeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ExchangeConfigHelper {
            api_key: String,
            secret_key: String,
            base_url: Option<String>,
            ws_url: Option<String>,
            window_ms: Option<u64>,
            #[serde(default)]
            market_kind: MarketKind,
        }

        let helper = ExchangeConfigHelper::deserialize(deserializer)?;
        let window_ms = helper.window_ms.unwrap_or(DEFAULT_WINDOW_MS);
        validate_window(window_ms).map_err(serde::de::Error::custom)?;

        Ok(Self {
            api_key: Secret::new(helper.api_key),
            secret_key: Secret::new(helper.secret_key),
            base_url: helper.base_url,
            ws_url: helper.ws_url,
            window_ms,
            market_kind: helper.market_kind,
        })
    }
}

impl ExchangeConfig {
    /// Create a new configuration with API credentials.
    ///
    /// `api_key` is the base64 ED25519 public key, `secret_key` the base64 32-byte seed.
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            api_key: Secret::new(api_key),
            secret_key: Secret::new(secret_key),
            base_url: None,
            ws_url: None,
            window_ms: DEFAULT_WINDOW_MS,
            market_kind: MarketKind::Spot,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY` (e.g., `BACKPACK_API_KEY`)
    /// - `{PREFIX}_SECRET_KEY`
    /// - `{PREFIX}_BASE_URL` (optional)
    /// - `{PREFIX}_WS_URL` (optional)
    /// - `{PREFIX}_WINDOW_MS` (optional, defaults to 5000)
    /// - `{PREFIX}_MARKET_KIND` (optional, `spot` or `perpetual`, defaults to spot)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let api_key_var = format!("{}_API_KEY", prefix);
        let secret_key_var = format!("{}_SECRET_KEY", prefix);
        let window_var = format!("{}_WINDOW_MS", prefix);

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        let window_ms = match env::var(&window_var) {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!("{} is not a number: {}", window_var, e))
            })?,
            Err(_) => DEFAULT_WINDOW_MS,
        };
        let market_kind = match env::var(format!("{}_MARKET_KIND", prefix)) {
            Ok(raw) => raw.parse()?,
            Err(_) => MarketKind::Spot,
        };

        Ok(Self::new(api_key, secret_key)
            .with_optional_urls(
                env::var(format!("{}_BASE_URL", prefix)).ok(),
                env::var(format!("{}_WS_URL", prefix)).ok(),
            )
            .window_ms(window_ms)?
            .market_kind(market_kind))
    }

    /// Load a `.env` file (if present) and then read the environment.
    ///
    /// **Security Warning**: never commit .env files to version control.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        load_env_file(env_file_path)?;
        Self::from_env(prefix)
    }

    /// Try `.env.local`, `.env.{ENVIRONMENT}` and `.env` in that order; the first one found wins.
    #[cfg(feature = "env-file")]
    pub fn from_env_auto(prefix: &str) -> Result<Self, ConfigError> {
        let env_files = [
            ".env.local".to_string(),
            format!(
                ".env.{}",
                env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
            ),
            ".env".to_string(),
        ];

        for env_file in &env_files {
            if load_env_file(env_file)? {
                break;
            }
        }

        Self::from_env(prefix)
    }

    /// Configuration for public market data only.
    #[must_use]
    pub fn read_only() -> Self {
        Self::new(String::new(), String::new())
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    #[must_use]
    pub fn ws_url(mut self, ws_url: String) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    /// Set the signing window, rejecting values the exchange would refuse.
    pub fn window_ms(mut self, window_ms: u64) -> Result<Self, ConfigError> {
        validate_window(window_ms)?;
        self.window_ms = window_ms;
        Ok(self)
    }

    #[must_use]
    pub fn market_kind(mut self, market_kind: MarketKind) -> Self {
        self.market_kind = market_kind;
        self
    }

    fn with_optional_urls(mut self, base_url: Option<String>, ws_url: Option<String>) -> Self {
        self.base_url = base_url;
        self.ws_url = ws_url;
        self
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

fn validate_window(window_ms: u64) -> Result<(), ConfigError> {
    if window_ms == 0 || window_ms > MAX_WINDOW_MS {
        return Err(ConfigError::InvalidConfiguration(format!(
            "signing window must be within 1..={} ms, got {}",
            MAX_WINDOW_MS, window_ms
        )));
    }
    Ok(())
}

/// Returns `Ok(false)` when the file does not exist.
#[cfg(feature = "env-file")]
fn load_env_file(path: &str) -> Result<bool, ConfigError> {
    match dotenv::from_path(path) {
        Ok(()) => Ok(true),
        Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
            Ok(false)
        }
        Err(e) => Err(ConfigError::InvalidConfiguration(format!(
            "Failed to load .env file '{}': {}",
            path, e
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
