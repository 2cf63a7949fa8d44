//! Risk gate scenarios against a live PortfolioRiskBook

use chrono::{DateTime, Duration, TimeZone, Utc};
use meridian_core::{PositionSide, RejectionReason, SymbolRules, TradeCandidate};
use meridian_ports::{EngineEvent, Notifier};
use meridian_risk_manager::{PortfolioRiskBook, RiskConfig, RiskGate, StaticCorrelationMatrix};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Recorder(Mutex<Vec<EngineEvent>>);

impl Notifier for Recorder {
    fn emit(&self, event: &EngineEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

fn long(symbol: &str, score: Decimal) -> TradeCandidate {
    TradeCandidate::new(symbol, PositionSide::Long, score, dec!(100), dec!(98), dec!(104))
        .with_leverage(dec!(5))
}

fn rules_for(symbols: &[&str]) -> HashMap<String, SymbolRules> {
    symbols
        .iter()
        .map(|s| (s.to_string(), SymbolRules::new(*s)))
        .collect()
}

#[tokio::test]
async fn test_scenario_a_two_percent_risk_at_five_x() {
    let _ = env_logger::try_init();
    let config = RiskConfig {
        base_risk_per_trade_pct: dec!(0.02),
        max_risk_per_trade_pct: dec!(0.02),
        ..Default::default()
    };
    let book = PortfolioRiskBook::new(config.clone(), dec!(10000), t0());
    let gate = RiskGate::new(config, Arc::new(StaticCorrelationMatrix::new()));

    let decision = gate
        .evaluate_and_reserve(&book, &long("BTCUSDT", dec!(80)), &SymbolRules::new("BTCUSDT"), t0())
        .await;

    assert!(decision.approved);
    let loss_over_leverage =
        (dec!(100) - dec!(98)) * decision.adjusted_quantity / decision.adjusted_leverage;
    assert!((loss_over_leverage - dec!(200)).abs() <= dec!(0.01));
    assert!(decision.reservation.is_some());
    assert_eq!(book.snapshot().await.total_risk_pct_committed, dec!(0.02));
}

#[tokio::test]
async fn test_scenario_b_correlated_lower_score_rejected() {
    let config = RiskConfig {
        correlation_threshold: 0.7,
        ..Default::default()
    };
    let book = PortfolioRiskBook::new(config.clone(), dec!(10000), t0());
    let matrix = StaticCorrelationMatrix::new().with_pair("BTCUSDT", "ETHUSDT", 0.85);
    let gate = RiskGate::new(config, Arc::new(matrix));

    let results = gate
        .select_batch(
            &book,
            vec![long("ETHUSDT", dec!(70)), long("BTCUSDT", dec!(90))],
            &rules_for(&["BTCUSDT", "ETHUSDT"]),
            t0(),
        )
        .await;

    assert_eq!(results[0].0.symbol, "BTCUSDT");
    assert!(results[0].1.approved);
    assert_eq!(results[1].0.symbol, "ETHUSDT");
    assert_eq!(
        results[1].1.rejection_reason,
        Some(RejectionReason::CorrelationLimit)
    );
}

#[tokio::test]
async fn test_correlation_against_open_positions() {
    let config = RiskConfig::default();
    let book = PortfolioRiskBook::new(config.clone(), dec!(10000), t0());
    book.register_open(Uuid::new_v4(), "BTCUSDT", dec!(0.01)).await;
    let matrix = StaticCorrelationMatrix::new().with_pair("BTCUSDT", "ETHUSDT", -0.8);
    let gate = RiskGate::new(config, Arc::new(matrix));

    let d = gate
        .evaluate_and_reserve(&book, &long("ETHUSDT", dec!(95)), &SymbolRules::new("ETHUSDT"), t0())
        .await;
    assert_eq!(d.rejection_reason, Some(RejectionReason::CorrelationLimit));
}

#[tokio::test]
async fn test_scenario_e_daily_loss_trips_breaker() {
    let config = RiskConfig {
        daily_max_loss_pct: dec!(0.03),
        max_consecutive_losses: 0,
        circuit_breaker_cooldown_ms: 60 * 60 * 1000,
        ..Default::default()
    };
    let recorder = Arc::new(Recorder::default());
    let book = PortfolioRiskBook::new(config.clone(), dec!(10000), t0())
        .with_notifier(recorder.clone());
    let gate = RiskGate::new(config, Arc::new(StaticCorrelationMatrix::new()));
    let rules = SymbolRules::new("SOLUSDT");

    // Realize -3% today
    let id = Uuid::new_v4();
    book.register_open(id, "BTCUSDT", dec!(0.01)).await;
    book.record_close(id, dec!(-300), t0()).await.unwrap();
    assert_eq!(book.snapshot().await.daily_realized_pnl_pct, dec!(-0.03));

    let first = gate
        .evaluate_and_reserve(&book, &long("SOLUSDT", dec!(80)), &rules, t0())
        .await;
    assert_eq!(first.rejection_reason, Some(RejectionReason::DailyLossLimit));

    let state = book.snapshot().await;
    assert!(state.circuit_breaker_active);
    assert_eq!(state.cooldown_until, Some(t0() + Duration::hours(1)));
    assert!(matches!(
        recorder.0.lock().unwrap().as_slice(),
        [EngineEvent::CircuitBreakerTripped { .. }]
    ));

    let during = gate
        .evaluate_and_reserve(&book, &long("SOLUSDT", dec!(80)), &rules, t0() + Duration::minutes(30))
        .await;
    assert_eq!(during.rejection_reason, Some(RejectionReason::CircuitBreakerActive));

    // Next day: counters reset and the cooldown has long expired
    let tomorrow = t0() + Duration::days(1);
    book.roll_day(tomorrow).await;
    let after = gate
        .evaluate_and_reserve(&book, &long("SOLUSDT", dec!(80)), &rules, tomorrow)
        .await;
    assert!(after.approved);
    assert!(!book.snapshot().await.circuit_breaker_active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_exceed_cap() {
    let config = RiskConfig {
        base_risk_per_trade_pct: dec!(0.01),
        max_portfolio_risk_pct: dec!(0.035),
        max_positions: 50,
        ..Default::default()
    };
    let book = Arc::new(PortfolioRiskBook::new(config.clone(), dec!(10000), t0()));
    let gate = Arc::new(RiskGate::new(config, Arc::new(StaticCorrelationMatrix::new())));

    let mut handles = Vec::new();
    for i in 0..20 {
        let book = book.clone();
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            let symbol = format!("SYM{i}USDT");
            let rules = SymbolRules::new(symbol.as_str());
            gate.evaluate_and_reserve(&book, &long(&symbol, dec!(60)), &rules, t0())
                .await
        }));
    }

    let mut approved = 0;
    for handle in handles {
        if handle.await.unwrap().approved {
            approved += 1;
        }
    }

    let state = book.snapshot().await;
    assert_eq!(approved, 3);
    assert!(state.total_risk_pct_committed <= dec!(0.035));
}
