use crate::core::kernel::RateLimit;
use nonzero_ext::nonzero;

pub const EXCHANGE_NAME: &str = "backpack";

pub const REST_URL: &str = "https://api.backpack.exchange";
pub const WSS_URL: &str = "wss://ws.backpack.exchange";

pub const HBOT_ORDER_ID_PREFIX: &str = "BPX-";
pub const MAX_ORDER_ID_LEN: usize = 32;

// REST paths
pub const ORDER_BOOK_PATH_URL: &str = "/api/v1/depth";
pub const SERVER_TIME_PATH_URL: &str = "/api/v1/time";
pub const MARKETS_PATH_URL: &str = "/api/v1/markets";
pub const TICKERS_PATH_URL: &str = "/api/v1/tickers";
pub const TRADES_PATH_URL: &str = "/api/v1/trades";
pub const ORDER_PATH_URL: &str = "/api/v1/order";
pub const ORDERS_PATH_URL: &str = "/api/v1/orders";
pub const CAPITAL_PATH_URL: &str = "/api/v1/capital";
pub const COLLATERAL_PATH_URL: &str = "/api/v1/capital/collateral";
pub const FILLS_PATH_URL: &str = "/wapi/v1/history/fills";
pub const MARK_PRICES_PATH_URL: &str = "/api/v1/markPrices";

// Stream channels
pub const DEPTH_CHANNEL: &str = "depth.";
pub const TRADE_CHANNEL: &str = "trade.";
pub const MARK_PRICE_CHANNEL: &str = "markPrice.";
pub const ORDER_UPDATE_CHANNEL: &str = "account.orderUpdate";

pub const REST_POOL: &str = "REST";
pub const WEB_SOCKET_POOL: &str = "WEB_SOCKET";

pub const MARKET_STATUS_ONLINE: &str = "ONLINE";

/// `marketType` values of perpetual markets (linear and inverse).
pub const PERPETUAL_MARKET_TYPES: [&str; 2] = ["PERP", "IPERP"];

/// Funding settles every eight hours.
pub const FUNDING_INTERVAL_MS: i64 = 8 * 60 * 60 * 1_000;

/// Per-IP request budgets: 100/s shared by all REST calls, 10/s for each endpoint.
pub fn rate_limits() -> Vec<RateLimit> {
    let mut limits = vec![
        RateLimit::pool(REST_POOL, nonzero!(100u32)),
        RateLimit::pool(WEB_SOCKET_POOL, nonzero!(30u32)),
    ];
    limits.extend(
        [
            ORDER_BOOK_PATH_URL,
            SERVER_TIME_PATH_URL,
            MARKETS_PATH_URL,
            TICKERS_PATH_URL,
            TRADES_PATH_URL,
            MARK_PRICES_PATH_URL,
            ORDER_PATH_URL,
            ORDERS_PATH_URL,
            CAPITAL_PATH_URL,
            COLLATERAL_PATH_URL,
            FILLS_PATH_URL,
        ]
        .into_iter()
        .map(|path| RateLimit::linked(path, nonzero!(10u32), REST_POOL)),
    );
    limits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::Throttler;

    #[test]
    fn test_endpoint_budget_binds_before_pool() {
        let throttler = Throttler::new(rate_limits(), REST_POOL);

        for _ in 0..10 {
            assert!(throttler.try_acquire(ORDER_BOOK_PATH_URL));
        }
        assert!(!throttler.try_acquire(ORDER_BOOK_PATH_URL));

        // Other endpoints and the shared pool still have room
        assert!(throttler.try_acquire(MARKETS_PATH_URL));
        assert!(throttler.try_acquire("/api/v1/unlisted"));
    }

    #[test]
    fn test_every_endpoint_is_linked_to_the_rest_pool() {
        let limits = rate_limits();
        let endpoints: Vec<&RateLimit> = limits
            .iter()
            .filter(|limit| limit.limit_id.starts_with('/'))
            .collect();
        assert!(!endpoints.is_empty());
        for limit in endpoints {
            assert_eq!(limit.linked_pool.as_deref(), Some(REST_POOL));
            assert!(limit.per_second.get() < 100);
        }
    }
}
