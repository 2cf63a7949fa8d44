//! Integration test: RetryingGateway <-> PaperExchange
//!
//! Transient failures are retried with backoff, permanent ones surface at once.

use meridian_core::Side;
use meridian_gateway::{
    ExchangeGateway, GatewayError, OrderRequest, PaperExchange, RetryPolicy, RetryingGateway,
};
use rust_decimal_macros::dec;
use std::time::Duration;

async fn gateway(max_retries: u32) -> RetryingGateway<PaperExchange> {
    let venue = PaperExchange::new(dec!(10000));
    venue.list_symbol("BTCUSDT", dec!(100)).await;
    RetryingGateway::new(
        venue,
        RetryPolicy::new(max_retries, Duration::from_millis(100), Duration::from_secs(1)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried() {
    let _ = env_logger::try_init();
    let gw = gateway(3).await;
    gw.inner().fail_next(GatewayError::Timeout).await;
    gw.inner().fail_next(GatewayError::RateLimited).await;

    let started = tokio::time::Instant::now();
    let result = gw
        .place_order(OrderRequest::market("c-1", "BTCUSDT", Side::Buy, dec!(1)))
        .await
        .unwrap();

    assert_eq!(result.filled_qty(), dec!(1));
    // 100ms + 200ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(gw.inner().placed_orders().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let gw = gateway(1).await;
    gw.inner().fail_next(GatewayError::Unavailable("maintenance".into())).await;
    gw.inner().fail_next(GatewayError::Unavailable("maintenance".into())).await;

    let result = gw.get_mark_price("BTCUSDT").await;
    assert_eq!(result, Err(GatewayError::Unavailable("maintenance".into())));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_not_retried() {
    let gw = gateway(3).await;
    gw.inner().fail_next(GatewayError::InsufficientBalance).await;

    let result = gw
        .place_order(OrderRequest::market("c-1", "BTCUSDT", Side::Buy, dec!(1)))
        .await;
    assert_eq!(result, Err(GatewayError::InsufficientBalance));
    assert!(gw.inner().placed_orders().await.is_empty());

    // Next call is unaffected
    assert_eq!(gw.get_mark_price("BTCUSDT").await, Ok(dec!(100)));
}

#[tokio::test]
async fn test_unknown_symbol() {
    let gw = gateway(3).await;
    assert_eq!(
        gw.get_symbol_rules("DOGEUSDT").await,
        Err(GatewayError::InvalidSymbol("DOGEUSDT".into()))
    );
}
