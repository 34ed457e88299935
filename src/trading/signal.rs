use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Result, VerifyError};
use crate::models::{Direction, Timeframe, Trend};

pub type TradeId = String;

const ALLOCATION_TOLERANCE: f64 = 1e-6;

/// A level on the target ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Tp1,
    Tp2,
    Tp3,
    StopLoss,
}

impl Target {
    pub const TAKE_PROFITS: [Target; 3] = [Target::Tp1, Target::Tp2, Target::Tp3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Tp1 => "TP1",
            Target::Tp2 => "TP2",
            Target::Tp3 => "TP3",
            Target::StopLoss => "SL",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    pub price: f64,
    /// Share of the position closed at this level, in percent.
    pub allocation_pct: f64,
}

impl TakeProfit {
    pub fn new(price: f64, allocation_pct: f64) -> Self {
        Self {
            price,
            allocation_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetLadder {
    pub tp1: TakeProfit,
    pub tp2: TakeProfit,
    pub tp3: TakeProfit,
}

impl TargetLadder {
    pub fn new(tp1: TakeProfit, tp2: TakeProfit, tp3: TakeProfit) -> Self {
        Self { tp1, tp2, tp3 }
    }

    /// Take-profit for `target`; `None` for the stop-loss.
    pub fn get(&self, target: Target) -> Option<&TakeProfit> {
        match target {
            Target::Tp1 => Some(&self.tp1),
            Target::Tp2 => Some(&self.tp2),
            Target::Tp3 => Some(&self.tp3),
            Target::StopLoss => None,
        }
    }

    /// Levels in ladder order, TP1 first.
    pub fn levels(&self) -> [(Target, &TakeProfit); 3] {
        [
            (Target::Tp1, &self.tp1),
            (Target::Tp2, &self.tp2),
            (Target::Tp3, &self.tp3),
        ]
    }

    pub fn total_allocation(&self) -> f64 {
        self.tp1.allocation_pct + self.tp2.allocation_pct + self.tp3.allocation_pct
    }

    /// Checks allocations and level ordering relative to entry and stop.
    pub fn validate(&self, direction: Direction, entry: f64, stop_loss: f64) -> Result<()> {
        for (target, tp) in self.levels() {
            if !tp.price.is_finite() || tp.price <= 0.0 {
                return Err(VerifyError::InvalidSignal(format!(
                    "{} price must be positive, got {}",
                    target, tp.price
                )));
            }
            if !tp.allocation_pct.is_finite() || tp.allocation_pct < 0.0 {
                return Err(VerifyError::InvalidSignal(format!(
                    "{} allocation must be non-negative, got {}",
                    target, tp.allocation_pct
                )));
            }
        }

        let total = self.total_allocation();
        if (total - 100.0).abs() > ALLOCATION_TOLERANCE {
            return Err(VerifyError::InvalidSignal(format!(
                "allocations sum to {}, expected 100",
                total
            )));
        }

        let beyond = |a: f64, b: f64| direction.reached(a, b) && a != b;
        if !beyond(self.tp1.price, entry) {
            return Err(VerifyError::InvalidSignal(format!(
                "TP1 {} is not beyond entry {} for a {} position",
                self.tp1.price, entry, direction
            )));
        }
        if !direction.reached(self.tp2.price, self.tp1.price)
            || !direction.reached(self.tp3.price, self.tp2.price)
        {
            return Err(VerifyError::InvalidSignal(
                "take-profit levels are out of order".to_string(),
            ));
        }
        if !beyond(entry, stop_loss) {
            return Err(VerifyError::InvalidSignal(format!(
                "stop-loss {} is not on the losing side of entry {}",
                stop_loss, entry
            )));
        }
        Ok(())
    }
}

/// Indicator values and market conditions frozen at signal generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    #[serde(default)]
    pub rsi: Option<f64>,
    #[serde(default)]
    pub macd: Option<Trend>,
    #[serde(default)]
    pub trend: Option<Trend>,
    /// Volume relative to its recent average (1.0 = average).
    #[serde(default)]
    pub volume_ratio: Option<f64>,
    #[serde(default)]
    pub market_condition: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Incoming signal as produced by the generator, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRequest {
    pub id: TradeId,
    pub symbol: String,
    #[serde(default = "default_direction")]
    pub direction: Direction,
    pub entry_price: f64,
    pub ladder: TargetLadder,
    pub stop_loss: f64,
    pub timeframe: Timeframe,
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub snapshot: MarketSnapshot,
}

fn default_direction() -> Direction {
    Direction::Long
}

/// A validated, immutable trade signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: TradeId,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub ladder: TargetLadder,
    pub stop_loss: f64,
    pub timeframe: Timeframe,
    /// 0-100
    pub confidence: f64,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub snapshot: MarketSnapshot,
}

impl TradeSignal {
    pub fn create(req: SignalRequest) -> Result<Self> {
        let signal = TradeSignal {
            expires_at: req.generated_at + req.timeframe.validity(),
            id: req.id,
            symbol: req.symbol.trim().to_uppercase(),
            direction: req.direction,
            entry_price: req.entry_price,
            ladder: req.ladder,
            stop_loss: req.stop_loss,
            timeframe: req.timeframe,
            confidence: req.confidence,
            generated_at: req.generated_at,
            snapshot: req.snapshot,
        };
        signal.validate()?;
        Ok(signal)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(VerifyError::InvalidSignal("empty id".to_string()));
        }
        if self.symbol.is_empty() {
            return Err(VerifyError::InvalidSignal(format!(
                "signal {} has no symbol",
                self.id
            )));
        }
        if !self.entry_price.is_finite() || self.entry_price <= 0.0 {
            return Err(VerifyError::InvalidSignal(format!(
                "entry price must be positive, got {}",
                self.entry_price
            )));
        }
        if !self.stop_loss.is_finite() || self.stop_loss <= 0.0 {
            return Err(VerifyError::InvalidSignal(format!(
                "stop-loss must be positive, got {}",
                self.stop_loss
            )));
        }
        if !(0.0..=100.0).contains(&self.confidence) {
            return Err(VerifyError::InvalidSignal(format!(
                "confidence must be within 0-100, got {}",
                self.confidence
            )));
        }
        if self.expires_at <= self.generated_at {
            return Err(VerifyError::InvalidSignal(
                "expiry must follow generation time".to_string(),
            ));
        }
        self.ladder
            .validate(self.direction, self.entry_price, self.stop_loss)
    }

    /// End of the evaluation window as of `now`.
    pub fn window_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.min(self.expires_at)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Read a JSON array of signal requests.
pub fn load_requests(path: &Path) -> Result<Vec<SignalRequest>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_request, sample_ladder};

    #[test]
    fn create_sets_expiry_from_timeframe() {
        let req = make_request("t1", Direction::Long, 100.0, 95.0);
        let generated = req.generated_at;
        let signal = TradeSignal::create(req).unwrap();
        assert_eq!(signal.expires_at, generated + Timeframe::H4.validity());
        assert!((signal.ladder.total_allocation() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_allocations_not_summing_to_100() {
        let mut req = make_request("t1", Direction::Long, 100.0, 95.0);
        req.ladder.tp3.allocation_pct = 30.0;
        let err = TradeSignal::create(req).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignal(_)));
    }

    #[test]
    fn rejects_stop_above_entry_for_long() {
        let req = make_request("t1", Direction::Long, 100.0, 101.0);
        assert!(TradeSignal::create(req).is_err());
    }

    #[test]
    fn rejects_out_of_order_ladder() {
        let mut req = make_request("t1", Direction::Long, 100.0, 95.0);
        req.ladder.tp2.price = 104.0;
        assert!(TradeSignal::create(req).is_err());
    }

    #[test]
    fn accepts_mirrored_short_ladder() {
        let mut req = make_request("s1", Direction::Short, 100.0, 105.0);
        req.ladder = TargetLadder::new(
            TakeProfit::new(95.0, 50.0),
            TakeProfit::new(90.0, 30.0),
            TakeProfit::new(80.0, 20.0),
        );
        assert!(TradeSignal::create(req).is_ok());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let mut req = make_request("t1", Direction::Long, 100.0, 95.0);
        req.confidence = 140.0;
        assert!(TradeSignal::create(req).is_err());
    }

    #[test]
    fn load_requests_reads_json_array() {
        let path = std::env::temp_dir().join(format!("signal_requests_{}.json", std::process::id()));
        let reqs = vec![make_request("t1", Direction::Long, 100.0, 95.0)];
        std::fs::write(&path, serde_json::to_string(&reqs).unwrap()).unwrap();
        let loaded = load_requests(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "t1");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn ladder_levels_in_order() {
        let ladder = sample_ladder();
        let targets: Vec<Target> = ladder.levels().iter().map(|(t, _)| *t).collect();
        assert_eq!(targets, Target::TAKE_PROFITS.to_vec());
        assert!(ladder.get(Target::StopLoss).is_none());
    }
}
