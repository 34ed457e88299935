#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use signal_verifier::error::{Result, VerifyError};
use signal_verifier::models::{Direction, PriceSample, PriceSeries, Timeframe};
use signal_verifier::prices::PriceHistoryProvider;
use signal_verifier::trading::signal::{
    MarketSnapshot, SignalRequest, TakeProfit, TargetLadder, TradeSignal,
};
use signal_verifier::trading::{MemoryStore, TradeRecord, TradeScope, TradeState, TradeStore};

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Close-only samples at 1m spacing from `start`.
pub fn ticks_from(start: DateTime<Utc>, prices: &[f64]) -> Vec<PriceSample> {
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| PriceSample::tick(start + Duration::minutes(i as i64), p))
        .collect()
}

/// Long 4h signal at `entry` with TPs at +5 / +10 / +20 % and the stop at -5 %.
pub fn long_request(id: &str, symbol: &str, entry: f64) -> SignalRequest {
    SignalRequest {
        id: id.to_string(),
        symbol: symbol.to_string(),
        direction: Direction::Long,
        entry_price: entry,
        ladder: TargetLadder::new(
            TakeProfit::new(entry * 1.05, 50.0),
            TakeProfit::new(entry * 1.10, 30.0),
            TakeProfit::new(entry * 1.20, 20.0),
        ),
        stop_loss: entry * 0.95,
        timeframe: Timeframe::H4,
        confidence: 70.0,
        generated_at: base_time(),
        snapshot: MarketSnapshot::default(),
    }
}

/// In-memory price source that can be told to fail for chosen symbols.
#[derive(Default)]
pub struct MockPrices {
    data: Mutex<HashMap<String, Vec<PriceSample>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<usize>,
}

impl MockPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, symbol: &str, samples: Vec<PriceSample>) {
        let mut data = self.data.lock().unwrap();
        data.entry(symbol.to_uppercase()).or_default().extend(samples);
    }

    pub fn fail(&self, symbol: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(symbol.to_uppercase());
        } else {
            set.remove(&symbol.to_uppercase());
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PriceHistoryProvider for MockPrices {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_prices(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PriceSeries> {
        *self.calls.lock().unwrap() += 1;
        if self.failing.lock().unwrap().contains(&symbol.to_uppercase()) {
            return Err(VerifyError::FetchFailure {
                symbol: symbol.to_string(),
                reason: "simulated outage".to_string(),
            });
        }
        let data = self.data.lock().unwrap();
        let samples = data
            .get(&symbol.to_uppercase())
            .map(|s| {
                s.iter()
                    .filter(|p| p.timestamp >= from && p.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(PriceSeries::new(samples))
    }
}

/// Memory store that lets another writer win the race for the next commit.
#[derive(Default)]
pub struct RacingStore {
    inner: MemoryStore,
    competing: Mutex<Option<TradeState>>,
    raced: Mutex<usize>,
}

impl RacingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit `state` on the caller's behalf just before its next commit lands.
    pub fn race_with(&self, state: TradeState) {
        *self.competing.lock().unwrap() = Some(state);
    }

    pub fn raced(&self) -> usize {
        *self.raced.lock().unwrap()
    }
}

#[async_trait]
impl TradeStore for RacingStore {
    async fn insert(&self, signal: TradeSignal) -> Result<TradeRecord> {
        self.inner.insert(signal).await
    }

    async fn get(&self, id: &str) -> Result<TradeRecord> {
        self.inner.get(id).await
    }

    async fn list(&self, scope: &TradeScope) -> Result<Vec<TradeRecord>> {
        self.inner.list(scope).await
    }

    async fn commit(
        &self,
        id: &str,
        expected_version: u64,
        state: TradeState,
        at: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        let competing = self.competing.lock().unwrap().take();
        if let Some(other) = competing {
            self.inner.commit(id, expected_version, other, at).await?;
            *self.raced.lock().unwrap() += 1;
        }
        self.inner.commit(id, expected_version, state, at).await
    }
}
