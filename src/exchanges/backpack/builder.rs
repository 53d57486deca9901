use crate::core::{
    config::ExchangeConfig,
    errors::ExchangeError,
    kernel::{ReqwestRest, RestClientBuilder, RestClientConfig, StreamConfig, Throttler},
};
use crate::exchanges::backpack::{
    auth::BackpackAuth,
    connector::{BackpackConnector, MarketData, UserStream},
    constants::{rate_limits, EXCHANGE_NAME, REST_POOL, REST_URL, WSS_URL},
};
use std::sync::Arc;
use tracing::info;

/// Create a Backpack connector with the default stream tuning
pub fn build_connector(
    config: ExchangeConfig,
    trading_pairs: Vec<String>,
) -> Result<BackpackConnector<ReqwestRest>, ExchangeError> {
    build_connector_with_stream_config(config, trading_pairs, StreamConfig::default())
}

/// Create a Backpack connector; private features are wired only when credentials are present
pub fn build_connector_with_stream_config(
    config: ExchangeConfig,
    trading_pairs: Vec<String>,
    stream_config: StreamConfig,
) -> Result<BackpackConnector<ReqwestRest>, ExchangeError> {
    let base_url = config.base_url.clone().unwrap_or_else(|| REST_URL.to_string());
    let ws_url = config.ws_url.clone().unwrap_or_else(|| WSS_URL.to_string());
    let throttler = Arc::new(Throttler::new(rate_limits(), REST_POOL));

    let rest_config = RestClientConfig::new(base_url, EXCHANGE_NAME.to_string())
        .with_timeout(30)
        .with_max_retries(3);

    let mut rest_builder = RestClientBuilder::new(rest_config).with_throttler(throttler.clone());

    let auth = if config.has_credentials() {
        let auth = Arc::new(BackpackAuth::from_config(&config)?);
        rest_builder = rest_builder.with_signer(auth.clone());
        Some(auth)
    } else {
        info!("no credentials configured, building a public-only connector");
        None
    };

    let rest = rest_builder.build()?;

    let market = MarketData::new(&rest, ws_url.clone(), trading_pairs, stream_config.clone())
        .with_market_kind(config.market_kind)
        .with_throttler(throttler.clone());
    info!(market_kind = %config.market_kind, "building connector");
    let user_stream = auth
        .map(|auth| UserStream::new(auth, ws_url, stream_config).with_throttler(throttler));

    Ok(BackpackConnector::new(&rest, market, user_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MarketKind;
    use crate::core::kernel::Ed25519Signer;
    use base64::{engine::general_purpose, Engine};

    #[test]
    fn test_read_only_config_builds_public_connector() {
        let connector = build_connector(ExchangeConfig::read_only(), vec!["SOL-USDC".into()]).unwrap();
        assert!(!connector.is_authenticated());
        assert_eq!(
            connector.market.stream_names(),
            vec!["depth.SOL_USDC".to_string(), "trade.SOL_USDC".to_string()]
        );
    }

    #[test]
    fn test_perpetual_config_subscribes_mark_price() {
        let config = ExchangeConfig::read_only().market_kind(MarketKind::Perpetual);
        let connector = build_connector(config, vec!["SOL-USDC-PERP".into()]).unwrap();
        assert_eq!(connector.market.market_kind(), MarketKind::Perpetual);
        assert_eq!(
            connector.market.stream_names(),
            vec![
                "depth.SOL_USDC_PERP".to_string(),
                "trade.SOL_USDC_PERP".to_string(),
                "markPrice.SOL_USDC_PERP".to_string()
            ]
        );
    }

    #[test]
    fn test_credentials_enable_user_stream() {
        let secret = general_purpose::STANDARD.encode([9u8; 32]);
        let public = Ed25519Signer::from_seed(&[9u8; 32]).verifying_key_base64();
        let connector = build_connector(ExchangeConfig::new(public, secret), vec![]).unwrap();
        assert!(connector.is_authenticated());
    }

    #[test]
    fn test_malformed_secret_is_fatal() {
        let result = build_connector(
            ExchangeConfig::new("key".to_string(), "***".to_string()),
            vec![],
        );
        assert!(matches!(result, Err(ExchangeError::ConfigurationError(_))));
    }
}
