use backpack_connector::core::config::ExchangeConfig;
use backpack_connector::core::kernel::{
    Ed25519Signer, ReqwestRest, RestClientBuilder, RestClientConfig,
};
use backpack_connector::exchanges::backpack::{BackpackAuth, BackpackRestClient};
use backpack_connector::{
    build_connector, AccountInfo, BackpackConnector, ExchangeError, FundingInfoSource,
    MarketKind, OrderBookDataSource, OrderBookMessage, OrderPlacer, OrderRequest, OrderState,
    OrderType, Price, Quantity, TradeType,
};
use base64::{engine::general_purpose, Engine};
use mockito::{Matcher, Request, Server};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

const SEED: [u8; 32] = [42u8; 32];

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn api_key() -> String {
    Ed25519Signer::from_seed(&SEED).verifying_key_base64()
}

fn signed_connector(server: &Server) -> BackpackConnector<ReqwestRest> {
    let config = ExchangeConfig::new(api_key(), general_purpose::STANDARD.encode(SEED))
        .base_url(server.url());
    build_connector(config, vec!["SOL-USDC".to_string()]).unwrap()
}

fn signature_matcher() -> Matcher {
    // base64 of a 64-byte signature
    Matcher::Regex(r"^[A-Za-z0-9+/]{86}==$".to_string())
}

/// Matches when `X-SIGNATURE` verifies over `<signed>&timestamp=<X-TIMESTAMP>&window=5000`.
fn signs(signed: &'static str) -> impl Fn(&Request) -> bool + Send + Sync + 'static {
    move |req: &Request| {
        let header = |name: &str| {
            req.header(name)
                .first()
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let (Some(timestamp), Some(signature)) = (header("X-TIMESTAMP"), header("X-SIGNATURE"))
        else {
            return false;
        };
        let message = format!("{}&timestamp={}&window=5000", signed, timestamp);
        Ed25519Signer::from_seed(&SEED).verify(&message, &signature)
    }
}

fn signed_rest_client(server: &Server) -> BackpackRestClient<ReqwestRest> {
    let auth = BackpackAuth::new(&api_key(), &general_purpose::STANDARD.encode(SEED)).unwrap();
    let rest = RestClientBuilder::new(RestClientConfig::new(server.url(), "backpack".to_string()))
        .with_signer(Arc::new(auth))
        .build()
        .unwrap();
    BackpackRestClient::new(rest)
}

fn perpetual_connector(server: &Server) -> BackpackConnector<ReqwestRest> {
    let config = ExchangeConfig::read_only()
        .base_url(server.url())
        .market_kind(MarketKind::Perpetual);
    build_connector(config, vec!["SOL-USDC-PERP".to_string()]).unwrap()
}

#[tokio::test]
async fn test_place_order_sends_signed_limit_body() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/order")
        .match_header("X-API-KEY", api_key().as_str())
        .match_header("X-WINDOW", "5000")
        .match_header("X-TIMESTAMP", Matcher::Regex(r"^\d{13}$".to_string()))
        .match_header("X-SIGNATURE", signature_matcher())
        .match_body(Matcher::PartialJson(json!({
            "symbol": "SOL_USDC",
            "side": "Bid",
            "orderType": "Limit",
            "price": "20.5",
            "quantity": "1.5",
            "postOnly": true,
            "clientId": 123_456
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "111222333",
                "clientId": 123_456,
                "symbol": "SOL_USDC",
                "side": "Bid",
                "orderType": "Limit",
                "quantity": "1.5",
                "price": "20.5",
                "status": "New",
                "createdAt": 1_700_000_000_000_i64
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let placed = connector
        .place_order(&OrderRequest {
            client_order_id: "BPX-123456".to_string(),
            trading_pair: "SOL-USDC".to_string(),
            trade_type: TradeType::Buy,
            order_type: OrderType::LimitMaker,
            amount: Quantity::new(dec("1.5")),
            price: Some(Price::new(dec("20.5"))),
            time_in_force: None,
        })
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(placed.exchange_order_id, "111222333");
    assert_eq!(placed.client_order_id, "BPX-123456");
    assert_eq!(placed.state, OrderState::Open);
    assert_eq!(placed.timestamp_ms, 1_700_000_000_000);
}

#[tokio::test]
async fn test_cancel_of_missing_order_reports_false() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/v1/order")
        .match_header("X-SIGNATURE", signature_matcher())
        .match_body(Matcher::PartialJson(json!({
            "symbol": "SOL_USDC",
            "clientId": 98_765
        })))
        .with_status(404)
        .with_body(r#"{"code":"RESOURCE_NOT_FOUND","message":"Order not found"}"#)
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let cancelled = connector
        .cancel_order("SOL-USDC", "BPX-98765", None)
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(!cancelled);
}

#[tokio::test]
async fn test_cancel_by_exchange_id_confirms_cancellation() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/v1/order")
        .match_body(Matcher::PartialJson(json!({
            "symbol": "SOL_USDC",
            "orderId": "111222333"
        })))
        .with_status(200)
        .with_body(
            json!({
                "id": "111222333",
                "symbol": "SOL_USDC",
                "status": "Cancelled"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let cancelled = connector
        .cancel_order("SOL-USDC", "BPX-1", Some("111222333"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(cancelled);
}

#[tokio::test]
async fn test_balances_merge_capital_and_collateral() {
    let mut server = Server::new_async().await;
    let capital = server
        .mock("GET", "/api/v1/capital")
        .match_header("X-SIGNATURE", signature_matcher())
        .with_status(200)
        .with_body(
            json!({
                "SOL": { "available": "1.5", "locked": "0.5", "staked": "0" },
                "USDC": { "available": "100", "locked": "0" }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let collateral = server
        .mock("GET", "/api/v1/capital/collateral")
        .with_status(200)
        .with_body(
            json!({
                "collateral": [
                    { "symbol": "USDC", "totalQuantity": "150", "availableQuantity": "120" },
                    { "symbol": "BTC", "totalQuantity": "0.1" }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let balances = connector.get_account_balance().await.unwrap();

    capital.assert_async().await;
    collateral.assert_async().await;

    let assets: Vec<&str> = balances.iter().map(|b| b.asset.as_str()).collect();
    assert_eq!(assets, vec!["BTC", "SOL", "USDC"]);

    assert_eq!(balances[0].total, dec("0.1"));
    assert_eq!(balances[0].available, dec("0.1"));
    assert_eq!(balances[1].available, dec("1.5"));
    assert_eq!(balances[1].total, dec("2.0"));
    assert_eq!(balances[2].available, dec("120"));
    assert_eq!(balances[2].total, dec("150"));
}

#[tokio::test]
async fn test_collateral_rejection_falls_back_to_capital() {
    let mut server = Server::new_async().await;
    let _capital = server
        .mock("GET", "/api/v1/capital")
        .with_status(200)
        .with_body(json!({ "SOL": { "available": "3", "locked": "1" } }).to_string())
        .create_async()
        .await;
    let _collateral = server
        .mock("GET", "/api/v1/capital/collateral")
        .with_status(400)
        .with_body(r#"{"code":"INVALID_CLIENT_REQUEST","message":"No margin account"}"#)
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let balances = connector.get_account_balance().await.unwrap();

    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].asset, "SOL");
    assert_eq!(balances[0].total, dec("4"));
}

#[tokio::test]
async fn test_snapshot_is_unsigned_and_sorted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/depth")
        .match_query(Matcher::UrlEncoded(
            "symbol".to_string(),
            "SOL_USDC".to_string(),
        ))
        .match_header("X-API-KEY", Matcher::Missing)
        .with_status(200)
        .with_body(
            json!({
                "bids": [["18.60", "1"], ["18.67", "0.832"]],
                "asks": [["18.80", "0"], ["18.70", "2"]],
                "lastUpdateId": "94978271",
                "timestamp": 1_694_687_965_941_i64
            })
            .to_string(),
        )
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let message = connector.get_new_order_book("SOL-USDC").await.unwrap();
    mock.assert_async().await;

    let OrderBookMessage::Snapshot(snapshot) = message else {
        panic!("expected a snapshot, got {:?}", message);
    };
    assert_eq!(snapshot.trading_pair, "SOL-USDC");
    assert_eq!(snapshot.update_id, 94_978_271);
    assert_eq!(snapshot.timestamp_ms, 1_694_687_965_941);

    let bids: Vec<Decimal> = snapshot.bids.iter().map(|r| r.price.value()).collect();
    let asks: Vec<Decimal> = snapshot.asks.iter().map(|r| r.price.value()).collect();
    assert_eq!(bids, vec![dec("18.67"), dec("18.60")]);
    assert_eq!(asks, vec![dec("18.70"), dec("18.80")]);
    assert!(snapshot.asks[1].quantity.is_zero());
}

#[tokio::test]
async fn test_public_market_queries() {
    let mut server = Server::new_async().await;
    let _tickers = server
        .mock("GET", "/api/v1/tickers")
        .with_status(200)
        .with_body(
            json!([
                { "symbol": "SOL_USDC", "lastPrice": "18.68", "volume": "1000" },
                { "symbol": "BTC_USDC", "lastPrice": "65000.1" }
            ])
            .to_string(),
        )
        .create_async()
        .await;
    let _markets = server
        .mock("GET", "/api/v1/markets")
        .with_status(200)
        .with_body(
            json!([
                { "symbol": "SOL_USDC", "baseSymbol": "SOL", "quoteSymbol": "USDC", "orderBookState": "Open" },
                { "symbol": "OLD_USDC", "baseSymbol": "OLD", "quoteSymbol": "USDC", "orderBookState": "Closed" },
                { "symbol": "SOL_USDC_PERP", "baseSymbol": "SOL", "quoteSymbol": "USDC", "orderBookState": "Open" }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let connector = build_connector(
        ExchangeConfig::read_only().base_url(server.url()),
        vec!["SOL-USDC".to_string()],
    )
    .unwrap();

    let prices = connector
        .get_last_traded_prices(&["SOL-USDC".to_string()])
        .await
        .unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices["SOL-USDC"], dec("18.68"));

    let pairs = connector.fetch_trading_pairs().await.unwrap();
    assert_eq!(pairs, vec!["SOL-USDC".to_string()]);

    let pairs = perpetual_connector(&server).fetch_trading_pairs().await.unwrap();
    assert_eq!(pairs, vec!["SOL-USDC-PERP".to_string()]);
}

#[tokio::test]
async fn test_cancel_all_signs_order_cancel_all() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("DELETE", "/api/v1/orders")
        .match_body(Matcher::PartialJson(json!({ "symbol": "SOL_USDC" })))
        .match_request(signs("instruction=orderCancelAll&symbol=SOL_USDC"))
        .with_status(200)
        .with_body(
            json!([
                { "id": "1", "symbol": "SOL_USDC", "status": "Cancelled" },
                { "id": "2", "symbol": "SOL_USDC", "status": "Cancelled" }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let connector = signed_connector(&server);
    let cancelled = connector.trading.cancel_all("SOL-USDC").await.unwrap();

    mock.assert_async().await;
    assert_eq!(cancelled, 2);
}

#[tokio::test]
async fn test_open_orders_are_a_signed_query() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/orders")
        .match_query(Matcher::UrlEncoded(
            "symbol".to_string(),
            "SOL_USDC".to_string(),
        ))
        .match_request(signs("instruction=orderQueryAll&symbol=SOL_USDC"))
        .with_status(200)
        .with_body(
            json!([{
                "id": "111222333",
                "clientId": 7,
                "symbol": "SOL_USDC",
                "status": "New",
                "createdAt": 1_700_000_000_000_i64
            }])
            .to_string(),
        )
        .create_async()
        .await;

    let orders = signed_rest_client(&server)
        .get_open_orders(Some("SOL_USDC"))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].id, "111222333");
    assert_eq!(orders[0].client_id, Some(7));
}

#[tokio::test]
async fn test_public_trades_and_server_time() {
    let mut server = Server::new_async().await;
    let trades = server
        .mock("GET", "/api/v1/trades")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".to_string(), "SOL_USDC".to_string()),
            Matcher::UrlEncoded("limit".to_string(), "2".to_string()),
        ]))
        .match_header("X-SIGNATURE", Matcher::Missing)
        .with_status(200)
        .with_body(
            json!([
                { "id": 10, "price": "18.70", "quantity": "1", "timestamp": 1_700_000_000_000_i64, "isBuyerMaker": true },
                { "id": 11, "price": "18.71", "quantity": "0.5", "quoteQuantity": "9.355", "timestamp": 1_700_000_000_100_i64, "isBuyerMaker": false }
            ])
            .to_string(),
        )
        .create_async()
        .await;
    let time = server
        .mock("GET", "/api/v1/time")
        .with_status(200)
        .with_body("1700000000123")
        .create_async()
        .await;

    let client = signed_rest_client(&server);
    let recent = client.get_trades("SOL_USDC", Some(2)).await.unwrap();
    let server_time = client.get_server_time().await.unwrap();

    trades.assert_async().await;
    time.assert_async().await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[1].id, Some(11));
    assert!(!recent[1].is_buyer_maker);
    assert_eq!(recent[1].quote_quantity.as_deref(), Some("9.355"));
    assert_eq!(server_time, 1_700_000_000_123);
}

#[tokio::test]
async fn test_funding_info_from_mark_prices() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/api/v1/markPrices")
        .match_query(Matcher::UrlEncoded(
            "symbol".to_string(),
            "SOL_USDC_PERP".to_string(),
        ))
        .match_header("X-API-KEY", Matcher::Missing)
        .with_status(200)
        .with_body(
            json!([{
                "fundingRate": "0.0000125",
                "indexPrice": "150.10",
                "markPrice": "150.25",
                "nextFundingTimestamp": 1_700_006_400_000_i64,
                "symbol": "SOL_USDC_PERP"
            }])
            .to_string(),
        )
        .create_async()
        .await;

    let connector = perpetual_connector(&server);
    let info = connector.get_funding_info("SOL-USDC-PERP").await.unwrap();

    mock.assert_async().await;
    assert_eq!(info.trading_pair, "SOL-USDC-PERP");
    assert_eq!(info.mark_price.value(), dec("150.25"));
    assert_eq!(info.index_price.value(), dec("150.10"));
    assert_eq!(info.rate, dec("0.0000125"));
    assert_eq!(info.next_funding_timestamp_ms, 1_700_006_400_000);

    let spot = signed_connector(&server);
    assert!(matches!(
        spot.get_funding_info("SOL-USDC-PERP").await,
        Err(ExchangeError::InvalidParameters(_))
    ));
}

#[tokio::test]
async fn test_perpetual_trading_rules_skip_spot_markets() {
    let mut server = Server::new_async().await;
    let _markets = server
        .mock("GET", "/api/v1/markets")
        .with_status(200)
        .with_body(
            json!([
                { "symbol": "SOL_USDC", "marketType": "SPOT", "orderBookState": "Open" },
                {
                    "symbol": "SOL_USDC_PERP", "marketType": "PERP", "orderBookState": "Open",
                    "filters": { "price": { "tickSize": "0.01" }, "quantity": { "stepSize": "0.01" } }
                }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let rules = perpetual_connector(&server).get_trading_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].trading_pair, "SOL-USDC-PERP");
    assert_eq!(rules[0].min_price_increment, dec("0.01"));
}

#[tokio::test]
async fn test_order_status_and_fills_for_order() {
    let mut server = Server::new_async().await;
    let _order = server
        .mock("GET", "/api/v1/order")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("symbol".to_string(), "SOL_USDC".to_string()),
            Matcher::UrlEncoded("orderId".to_string(), "111222333".to_string()),
        ]))
        .match_header("X-SIGNATURE", signature_matcher())
        .with_status(200)
        .with_body(
            json!({
                "id": "111222333",
                "clientId": 123_456,
                "symbol": "SOL_USDC",
                "status": "PartiallyFilled",
                "createdAt": 1_700_000_000_000_i64
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _fills = server
        .mock("GET", "/wapi/v1/history/fills")
        .match_query(Matcher::UrlEncoded(
            "orderId".to_string(),
            "111222333".to_string(),
        ))
        .with_status(200)
        .with_body(
            json!([
                {
                    "tradeId": 9001,
                    "orderId": "111222333",
                    "symbol": "SOL_USDC",
                    "side": "Bid",
                    "price": "20.5",
                    "quantity": "0.5",
                    "fee": "0.001",
                    "feeSymbol": "SOL",
                    "timestamp": "2024-05-01T12:00:00.123"
                },
                {
                    "tradeId": 9002,
                    "orderId": "999",
                    "symbol": "SOL_USDC",
                    "side": "Bid",
                    "price": "20.4",
                    "quantity": "1",
                    "fee": "0.002",
                    "feeSymbol": "SOL",
                    "timestamp": "2024-05-01T12:00:01.000"
                }
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let connector = signed_connector(&server);

    let update = connector
        .request_order_status("SOL-USDC", "BPX-123456", Some("111222333"))
        .await
        .unwrap();
    assert_eq!(update.new_state, OrderState::PartiallyFilled);
    assert_eq!(update.client_order_id.as_deref(), Some("BPX-123456"));
    assert_eq!(update.exchange_order_id.as_deref(), Some("111222333"));

    let trades = connector
        .all_trade_updates_for_order("SOL-USDC", "BPX-123456", "111222333")
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].trade_id, "9001");
    assert_eq!(trades[0].fill_quote_amount, dec("10.25"));
    assert_eq!(trades[0].fee.asset.as_deref(), Some("SOL"));
    assert_eq!(trades[0].fill_timestamp_ms, 1_714_564_800_123);
}
