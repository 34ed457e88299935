mod common;

use chrono::Duration;
use std::sync::Arc;

use signal_verifier::analytics::{self, PatternAnalyzer, PerformanceAggregator};
use signal_verifier::clock::ManualClock;
use signal_verifier::config::Config;
use signal_verifier::monitor::{NotificationKind, RealTimeMonitor};
use signal_verifier::trading::lifecycle::{DataQuality, ExpiryPolicy};
use signal_verifier::trading::signal::Target;
use signal_verifier::trading::{
    JsonFileStore, MemoryStore, TradeLifecycleManager, TradeScope, TradeState, TradeStatus,
    TradeStore,
};

use common::{base_time, long_request, ticks_from, MockPrices, RacingStore};

fn test_config() -> Config {
    Config {
        provider: "file".to_string(),
        coinbase_api_key: String::new(),
        coinbase_api_secret: String::new(),
        price_data_dir: String::new(),
        store_path: String::new(),
        notional_usd: 1000.0,
        expiry_policy: ExpiryPolicy::ByPnl,
        monitor_interval_secs: 1,
        materiality_threshold_pct: 5.0,
        max_concurrent_evaluations: 2,
        pattern_significance: 0.05,
        pattern_min_expected: 5.0,
        pattern_min_occurrences: 5,
        pattern_top_n: 10,
        log_dir: String::new(),
        log_level: "debug".to_string(),
    }
}

struct World {
    store: Arc<dyn TradeStore>,
    prices: Arc<MockPrices>,
    clock: Arc<ManualClock>,
    manager: Arc<TradeLifecycleManager>,
}

fn world_with(store: Arc<dyn TradeStore>) -> World {
    let prices = Arc::new(MockPrices::new());
    let clock = Arc::new(ManualClock::new(base_time()));
    let manager = Arc::new(TradeLifecycleManager::from_config(
        &test_config(),
        store.clone(),
        prices.clone(),
        clock.clone(),
    ));
    World {
        store,
        prices,
        clock,
        manager,
    }
}

fn world() -> World {
    world_with(Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn verify_all_then_analytics() {
    let w = world();
    w.manager.register(long_request("btc-1", "BTC", 100.0)).await.unwrap();
    w.manager.register(long_request("eth-1", "ETH", 200.0)).await.unwrap();
    w.manager.register(long_request("sol-1", "SOL", 50.0)).await.unwrap();
    w.manager.register(long_request("xrp-1", "XRP", 1.0)).await.unwrap();

    // BTC runs the whole ladder, ETH tags TP1 then stops, SOL drifts up until expiry
    w.prices.push("BTC", ticks_from(base_time(), &[101.0, 105.0, 111.0, 121.0]));
    w.prices.push("ETH", ticks_from(base_time(), &[201.0, 210.5, 199.0, 189.0]));
    w.prices.push("SOL", ticks_from(base_time(), &[50.5, 51.0, 51.5]));
    w.clock.advance(Duration::days(4));

    let summary = w.manager.verify_all(&TradeScope::all()).await.unwrap();
    assert_eq!(summary.verified, 4);
    assert_eq!(summary.updated, 4);
    assert!(summary.errors.is_empty());

    let status = |id: &'static str| {
        let store = w.store.clone();
        async move { store.get(id).await.unwrap().status() }
    };
    assert_eq!(status("btc-1").await, TradeStatus::CompletedSuccess);
    assert_eq!(status("eth-1").await, TradeStatus::CompletedFailure);
    assert_eq!(status("sol-1").await, TradeStatus::CompletedSuccess);
    assert_eq!(status("xrp-1").await, TradeStatus::IncompleteData);

    // Second pass is a no-op
    let again = w.manager.verify_all(&TradeScope::all()).await.unwrap();
    assert_eq!(again.verified, 0);

    let stats = analytics::performance(
        w.store.as_ref(),
        &TradeScope::all(),
        &PerformanceAggregator::default(),
    )
    .await
    .unwrap();
    assert_eq!(stats.total_trades, 4);
    assert_eq!(stats.wins, 2);
    assert_eq!(stats.losses, 1);
    assert_eq!(stats.by_status["incomplete_data"], 1);
    // 95 + 0 + 30
    assert!((stats.total_pnl_usd - 125.0).abs() < 1e-6);
    assert!(stats.advanced.profit_factor.is_infinite());

    let eth_only = analytics::performance(
        w.store.as_ref(),
        &TradeScope::symbol("eth"),
        &PerformanceAggregator::default(),
    )
    .await
    .unwrap();
    assert_eq!(eth_only.total_trades, 1);
    assert_eq!(eth_only.success_rate, Some(0.0));

    let patterns = analytics::patterns(w.store.as_ref(), &TradeScope::all(), &PatternAnalyzer::default())
        .await
        .unwrap();
    assert_eq!(patterns.winners, 2);
    assert!(patterns.success_factors.is_empty());
}

#[tokio::test]
async fn monitor_follows_trade_to_stop() {
    let w = world();
    let monitor = RealTimeMonitor::new(w.manager.clone(), &test_config());
    let mut rx = monitor.subscribe();
    w.manager.register(long_request("t1", "BTC", 100.0)).await.unwrap();

    w.prices.push("BTC", ticks_from(base_time(), &[101.0, 105.5]));
    w.clock.advance(Duration::minutes(2));
    monitor.sweep().await.unwrap();
    let n = rx.try_recv().unwrap();
    assert_eq!(n.kind, NotificationKind::TargetHit);
    assert_eq!(n.target, Some(Target::Tp1));

    w.prices.push("BTC", ticks_from(base_time() + Duration::minutes(2), &[110.5]));
    w.clock.advance(Duration::minutes(1));
    monitor.sweep().await.unwrap();
    assert_eq!(rx.try_recv().unwrap().target, Some(Target::Tp2));

    w.prices.push("BTC", ticks_from(base_time() + Duration::minutes(3), &[94.0]));
    w.clock.advance(Duration::minutes(1));
    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.closed, 1);
    let stop = rx.try_recv().unwrap();
    assert_eq!(stop.target, Some(Target::StopLoss));
    assert_eq!(stop.status, TradeStatus::CompletedFailure);

    // 2.5 + 3.0 - 1.0
    let record = w.store.get("t1").await.unwrap();
    let pnl = record.state.pnl().unwrap();
    assert!((pnl.net_percent - 4.5).abs() < 1e-9);

    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.active, 0);
}

#[tokio::test]
async fn fetch_failure_is_isolated_to_one_trade() {
    let w = world();
    let monitor = RealTimeMonitor::new(w.manager.clone(), &test_config());
    w.manager.register(long_request("ok", "BTC", 100.0)).await.unwrap();
    w.manager.register(long_request("down", "ETH", 100.0)).await.unwrap();
    w.prices.push("BTC", ticks_from(base_time(), &[106.0]));
    w.prices.push("ETH", ticks_from(base_time(), &[106.0]));
    w.prices.fail("ETH", true);
    w.clock.advance(Duration::minutes(1));

    let report = monitor.sweep().await.unwrap();
    assert_eq!(report.active, 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].trade_id, "down");
    assert_eq!(report.updated, 1);

    let down = w.store.get("down").await.unwrap();
    assert_eq!(down.status(), TradeStatus::Active);
    assert_eq!(down.version, 0);

    // Provider recovers; the trade catches up on the next sweep
    w.prices.fail("ETH", false);
    let report = monitor.sweep().await.unwrap();
    assert!(report.errors.is_empty());
    let down = w.store.get("down").await.unwrap();
    assert!(down.state.result().unwrap().hits.is_hit(Target::Tp1));
}

#[tokio::test]
async fn expired_fetch_failure_never_marks_incomplete() {
    let w = world();
    w.manager.register(long_request("t1", "BTC", 100.0)).await.unwrap();
    w.prices.fail("BTC", true);
    w.clock.advance(Duration::days(4));

    let summary = w.manager.verify_all(&TradeScope::all()).await.unwrap();
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(
        w.store.get("t1").await.unwrap().status(),
        TradeStatus::Active
    );
}

#[tokio::test]
async fn back_to_back_evaluations_commit_once() {
    let w = world();
    w.manager.register(long_request("t1", "BTC", 100.0)).await.unwrap();
    w.prices.push("BTC", ticks_from(base_time(), &[101.0, 106.0]));
    w.clock.advance(Duration::minutes(5));

    let (a, b) = tokio::join!(w.manager.verify("t1"), w.manager.advance("t1"));
    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(w.store.get("t1").await.unwrap().version, 1);
}

#[tokio::test]
async fn lost_commit_race_is_retried_once() {
    let store = Arc::new(RacingStore::new());
    let w = world_with(store.clone());
    w.manager.register(long_request("t1", "BTC", 100.0)).await.unwrap();
    w.prices.push("BTC", ticks_from(base_time(), &[101.0, 106.0]));
    w.clock.advance(Duration::minutes(2));

    store.race_with(TradeState::initial());
    let t = w.manager.verify("t1").await.unwrap();
    assert_eq!(store.raced(), 1);
    assert!(t.changed);
    assert_eq!(t.to, TradeStatus::Active);
    assert_eq!(t.new_hits.len(), 1);
    assert_eq!(t.new_hits[0].0, Target::Tp1);

    let record = w.store.get("t1").await.unwrap();
    assert_eq!(record.version, 2);
    assert!(record.state.result().unwrap().hits.is_hit(Target::Tp1));
}

#[tokio::test]
async fn lost_race_to_a_terminal_write_is_a_no_op() {
    let store = Arc::new(RacingStore::new());
    let w = world_with(store.clone());
    w.manager.register(long_request("t1", "BTC", 100.0)).await.unwrap();
    w.prices.push("BTC", ticks_from(base_time(), &[101.0, 106.0]));
    w.clock.advance(Duration::minutes(2));

    store.race_with(TradeState::IncompleteData {
        checked_at: w.manager.now(),
        data: DataQuality::empty("other", w.manager.now()),
    });
    let t = w.manager.verify("t1").await.unwrap();
    assert_eq!(store.raced(), 1);
    assert!(!t.changed);
    assert_eq!(t.to, TradeStatus::IncompleteData);

    let record = w.store.get("t1").await.unwrap();
    assert_eq!(record.version, 1);
    assert_eq!(record.status(), TradeStatus::IncompleteData);
}

#[tokio::test]
async fn json_store_survives_restart() {
    let path = std::env::temp_dir().join(format!("signal_it_{}/trades.json", std::process::id()));
    let _ = std::fs::remove_file(&path);

    {
        let w = world_with(Arc::new(JsonFileStore::open(&path).unwrap()));
        w.manager.register(long_request("t1", "BTC", 100.0)).await.unwrap();
        w.prices.push("BTC", ticks_from(base_time(), &[94.0]));
        w.clock.advance(Duration::minutes(1));
        w.manager.verify("t1").await.unwrap();
    }

    let reopened = JsonFileStore::open(&path).unwrap();
    let record = reopened.get("t1").await.unwrap();
    assert_eq!(record.status(), TradeStatus::CompletedFailure);
    assert_eq!(
        record.state.result().unwrap().hits.stop_loss.unwrap().price,
        95.0
    );
    let _ = std::fs::remove_file(&path);
}
