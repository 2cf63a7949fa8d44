//! End-to-end engine scenarios against the paper venue

use chrono::{DateTime, TimeZone, Utc};
use meridian_clock::ManualClock;
use meridian_core::{ExitReason, PositionSide, PositionStatus, RejectionReason, TradeCandidate};
use meridian_gateway::PaperExchange;
use meridian_ports::EngineEvent;
use meridian_risk_manager::StaticCorrelationMatrix;
use meridian_runner::{
    ChannelNotifier, Engine, EngineConfig, EngineError, ForceCloseTarget, JsonFileStore,
    StaticCandidateSource,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

fn long(symbol: &str, score: Decimal) -> TradeCandidate {
    TradeCandidate::new(symbol, PositionSide::Long, score, dec!(100), dec!(98), dec!(104))
        .with_leverage(dec!(5))
}

async fn venue() -> Arc<PaperExchange> {
    let _ = env_logger::try_init();
    let venue = Arc::new(PaperExchange::new(dec!(10000)));
    for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
        venue.list_symbol(symbol, dec!(100)).await;
    }
    venue
}

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("meridian-engine-{}", uuid::Uuid::new_v4().simple()))
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind());
    }
    kinds
}

#[tokio::test(start_paused = true)]
async fn test_running_engine_opens_then_stops_out() {
    let venue = venue().await;
    let events = Arc::new(ChannelNotifier::new(64));
    let mut rx = events.subscribe();
    let source = Arc::new(StaticCandidateSource::once(vec![long("BTCUSDT", dec!(80))]));

    let engine = Engine::builder(EngineConfig::default(), venue.clone(), source)
        .with_notifier(events.clone())
        .build()
        .await
        .unwrap();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let position = engine.ledger().find_by_symbol("BTCUSDT").await.unwrap();
    assert_eq!(position.status, PositionStatus::Open);
    assert_eq!(position.stop_loss_price, dec!(98));
    assert_eq!(engine.get_status().await.open_positions_count, 1);

    // Mark falls through the stop; the monitor loop closes it
    venue.set_mark_price("BTCUSDT", dec!(97.5)).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(engine.ledger().is_empty());
    assert_eq!(venue.position_quantity("BTCUSDT").await, Decimal::ZERO);

    engine.stop().await.unwrap();
    let status = engine.get_status().await;
    assert!(!status.running);
    assert_eq!(status.metrics.cycles_run, 1);
    assert_eq!(status.metrics.executions_succeeded, 1);
    assert_eq!(status.metrics.closes.get("STOP_LOSS"), Some(&1));
    assert_eq!(status.portfolio_risk_state.consecutive_losses, 1);
    assert_eq!(status.portfolio_risk_state.open_positions_count, 0);

    let kinds = drain(&mut rx);
    assert_eq!(kinds.first(), Some(&"position_opened"));
    assert!(kinds.contains(&"position_closed"));
}

#[tokio::test(start_paused = true)]
async fn test_correlated_candidates_in_one_cycle() {
    let venue = venue().await;
    let source = Arc::new(StaticCandidateSource::new(vec![
        long("ETHUSDT", dec!(70)),
        long("BTCUSDT", dec!(90)),
    ]));
    let engine = Engine::builder(EngineConfig::default(), venue, source)
        .with_correlation(Arc::new(
            StaticCorrelationMatrix::new().with_pair("BTCUSDT", "ETHUSDT", 0.85),
        ))
        .build()
        .await
        .unwrap();

    let report = engine.run_cycle_once().await;

    assert_eq!(report.approved, 1);
    assert_eq!(report.rejections, vec![RejectionReason::CorrelationLimit]);
    assert_eq!(report.executed.len(), 1);
    assert!(engine.ledger().find_by_symbol("BTCUSDT").await.is_some());
    assert!(engine.ledger().find_by_symbol("ETHUSDT").await.is_none());
    assert_eq!(
        engine.metrics().rejections.get("CORRELATION_LIMIT"),
        Some(&1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_daily_loss_blocks_rest_of_day() {
    let venue = venue().await;
    let source = Arc::new(StaticCandidateSource::new(vec![long("BTCUSDT", dec!(80))]));
    let clock = ManualClock::new(Some(t0()));
    let engine = Engine::builder(EngineConfig::default(), venue.clone(), source.clone())
        .with_clock(clock.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(engine.run_cycle_once().await.executed.len(), 1);

    // Stop out for roughly -6% of equity
    venue.set_mark_price("BTCUSDT", dec!(97.5)).await;
    let tick = engine.monitor().tick().await;
    assert_eq!(tick.closed.len(), 1);
    assert_eq!(tick.closed[0].1, ExitReason::StopLoss);
    let state = engine.book().snapshot().await;
    assert!(state.daily_realized_pnl_pct <= dec!(-0.03));

    venue.set_mark_price("BTCUSDT", dec!(100)).await;
    source.replace(vec![long("ETHUSDT", dec!(85))]);
    let report = engine.run_cycle_once().await;
    assert_eq!(report.rejections, vec![RejectionReason::DailyLossLimit]);
    assert!(engine.book().snapshot().await.circuit_breaker_active);

    clock.advance(chrono::Duration::minutes(30));
    let report = engine.run_cycle_once().await;
    assert_eq!(report.rejections, vec![RejectionReason::CircuitBreakerActive]);
    assert!(engine.ledger().is_empty());
    assert_eq!(engine.metrics().breaker_trips, 1);
}

#[tokio::test(start_paused = true)]
async fn test_config_limits_positions() {
    let venue = venue().await;
    let config = EngineConfig::from_json(r#"{ "risk": { "max_positions": 1 } }"#).unwrap();
    let source = Arc::new(StaticCandidateSource::new(vec![
        long("BTCUSDT", dec!(90)),
        long("SOLUSDT", dec!(80)),
    ]));
    let engine = Engine::builder(config, venue, source).build().await.unwrap();

    let report = engine.run_cycle_once().await;

    assert_eq!(report.executed.len(), 1);
    assert_eq!(report.rejections, vec![RejectionReason::MaxPositionsReached]);
}

#[tokio::test(start_paused = true)]
async fn test_force_close_all_is_manual() {
    let venue = venue().await;
    let source = Arc::new(StaticCandidateSource::once(vec![
        long("BTCUSDT", dec!(90)),
        long("SOLUSDT", dec!(80)),
    ]));
    let engine = Engine::builder(EngineConfig::default(), venue.clone(), source)
        .build()
        .await
        .unwrap();
    let report = engine.run_cycle_once().await;
    assert_eq!(report.executed.len(), 2);

    let first = report.executed[0];
    assert_eq!(
        engine.force_close(ForceCloseTarget::Position(first)).await.unwrap(),
        vec![first]
    );
    assert!(matches!(
        engine.force_close(ForceCloseTarget::Position(first)).await,
        Err(EngineError::Ledger(_))
    ));

    let closed = engine.force_close(ForceCloseTarget::All).await.unwrap();
    assert_eq!(closed, vec![report.executed[1]]);
    assert!(engine.ledger().is_empty());
    assert_eq!(engine.metrics().closes.get("MANUAL"), Some(&2));
    assert_eq!(venue.position_quantity("SOLUSDT").await, Decimal::ZERO);
    assert_eq!(engine.book().snapshot().await.total_risk_pct_committed, Decimal::ZERO);
}

#[tokio::test]
async fn test_restart_restores_persisted_positions() {
    let venue = venue().await;
    let dir = temp_dir();

    let opened = {
        let store = Arc::new(JsonFileStore::open(&dir).await.unwrap());
        let source = Arc::new(StaticCandidateSource::once(vec![long("BTCUSDT", dec!(80))]));
        let engine = Engine::builder(EngineConfig::default(), venue.clone(), source)
            .with_store(store)
            .build()
            .await
            .unwrap();
        let report = engine.run_cycle_once().await;
        report.executed[0]
    };

    // A new engine over the same store and venue picks the position back up
    let store = Arc::new(JsonFileStore::open(&dir).await.unwrap());
    let engine = Engine::builder(
        EngineConfig::default(),
        venue.clone(),
        Arc::new(StaticCandidateSource::empty()),
    )
    .with_store(store.clone())
    .build()
    .await
    .unwrap();
    engine.start().await.unwrap();

    let restored = engine.ledger().get(opened).await.unwrap();
    assert_eq!(restored.symbol, "BTCUSDT");
    assert_eq!(restored.stop_loss_price, dec!(98));
    let state = engine.book().snapshot().await;
    assert_eq!(state.open_positions_count, 1);
    assert_eq!(state.total_risk_pct_committed, dec!(0.01));

    engine.stop().await.unwrap();
    assert_eq!(engine.ledger().len(), 1);
    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_restart_closes_positions_gone_from_exchange() {
    let venue = venue().await;
    let dir = temp_dir();
    let store = Arc::new(JsonFileStore::open(&dir).await.unwrap());

    let opened = {
        let source = Arc::new(StaticCandidateSource::once(vec![long("BTCUSDT", dec!(80))]));
        let engine = Engine::builder(EngineConfig::default(), venue.clone(), source)
            .with_store(store.clone())
            .build()
            .await
            .unwrap();
        engine.run_cycle_once().await.executed[0]
    };

    // Closed by hand on the exchange while the engine was down
    venue.remove_position("BTCUSDT").await;

    let engine = Engine::builder(
        EngineConfig::default(),
        venue,
        Arc::new(StaticCandidateSource::empty()),
    )
    .with_store(store.clone())
    .build()
    .await
    .unwrap();
    engine.start().await.unwrap();

    assert!(engine.ledger().is_empty());
    assert_eq!(engine.metrics().closes.get("EXTERNAL_CLOSE"), Some(&1));
    let record = store.load(opened).await.unwrap().unwrap();
    assert_eq!(record.status, PositionStatus::Closed);
    assert_eq!(record.exit_reason, Some(ExitReason::ExternalClose));

    engine.stop().await.unwrap();
    let _ = tokio::fs::remove_dir_all(&dir).await;
}
