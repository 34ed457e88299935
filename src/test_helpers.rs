use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::models::{Direction, PriceSample, PriceSeries, Timeframe};
use crate::trading::lifecycle::ExpiryPolicy;
use crate::trading::signal::{MarketSnapshot, SignalRequest, TakeProfit, TargetLadder, TradeSignal};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Close-only samples at 1m spacing from `base_time()`.
pub fn make_ticks(prices: &[f64]) -> PriceSeries {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| PriceSample::tick(base_time() + Duration::minutes(i as i64), p))
        .collect()
}

/// OHLC bars from (open, high, low, close) tuples at 1m spacing.
pub fn make_bars(data: &[(f64, f64, f64, f64)]) -> PriceSeries {
    data.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            PriceSample::bar(base_time() + Duration::minutes(i as i64), o, h, l, c)
        })
        .collect()
}

/// Long ladder for entry 100: 105 / 110 / 120 at 50 / 30 / 20.
pub fn sample_ladder() -> TargetLadder {
    TargetLadder::new(
        TakeProfit::new(105.0, 50.0),
        TakeProfit::new(110.0, 30.0),
        TakeProfit::new(120.0, 20.0),
    )
}

/// BTC 4h signal with TPs at +5 / +10 / +20 % of entry (mirrored for shorts).
pub fn make_request(id: &str, direction: Direction, entry: f64, stop: f64) -> SignalRequest {
    let level = |pct: f64| entry + direction.sign() * entry * pct / 100.0;
    SignalRequest {
        id: id.to_string(),
        symbol: "BTC".to_string(),
        direction,
        entry_price: entry,
        ladder: TargetLadder::new(
            TakeProfit::new(level(5.0), 50.0),
            TakeProfit::new(level(10.0), 30.0),
            TakeProfit::new(level(20.0), 20.0),
        ),
        stop_loss: stop,
        timeframe: Timeframe::H4,
        confidence: 70.0,
        generated_at: base_time(),
        snapshot: MarketSnapshot::default(),
    }
}

pub fn make_signal(id: &str, direction: Direction, entry: f64, stop: f64) -> TradeSignal {
    TradeSignal::create(make_request(id, direction, entry, stop)).unwrap()
}

/// Config with the in-memory provider and a temp store path.
pub fn default_test_config() -> Config {
    Config {
        provider: "file".to_string(),
        coinbase_api_key: String::new(),
        coinbase_api_secret: String::new(),
        price_data_dir: std::env::temp_dir()
            .join("signal_verifier_test_prices")
            .to_string_lossy()
            .to_string(),
        store_path: std::env::temp_dir()
            .join("signal_verifier_test_trades.json")
            .to_string_lossy()
            .to_string(),
        notional_usd: 1000.0,
        expiry_policy: ExpiryPolicy::ByPnl,
        monitor_interval_secs: 30,
        materiality_threshold_pct: 5.0,
        max_concurrent_evaluations: 4,
        pattern_significance: 0.05,
        pattern_min_expected: 5.0,
        pattern_min_occurrences: 5,
        pattern_top_n: 10,
        log_dir: std::env::temp_dir()
            .join("signal_verifier_test_logs")
            .to_string_lossy()
            .to_string(),
        log_level: "DEBUG".to_string(),
    }
}
