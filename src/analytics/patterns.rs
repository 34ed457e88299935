use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::analytics::stats::{chi_square_2x2, round4};
use crate::config::Config;
use crate::models::session::{day_of_week, session_at};
use crate::models::Outcome;
use crate::trading::signal::TradeSignal;
use crate::trading::store::TradeRecord;

/// Generation-time conditions every signal is bucketed on. Free-form snapshot
/// labels are added on top as `label:<key>`.
const DIMENSIONS: &[&str] = &[
    "rsi_bucket",
    "macd_signal",
    "trend",
    "volume_regime",
    "market_condition",
    "confidence_bucket",
    "session",
    "day_of_week",
    "timeframe",
    "direction",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub dimension: String,
    pub value: String,
    /// Completed trades showing the condition.
    pub occurrences: usize,
    pub wins: usize,
    pub losses: usize,
    /// Share of winners showing the condition.
    pub rate_in_winners: f64,
    /// Share of losers showing the condition.
    pub rate_in_losers: f64,
    pub predictive_power: f64,
    pub chi_square: f64,
    pub p_value: f64,
    /// 1 - p
    pub confidence: f64,
    pub significant: bool,
}

impl PatternRecord {
    pub fn condition(&self) -> String {
        format!("{}={}", self.dimension, self.value)
    }

    pub fn favours(&self) -> Outcome {
        if self.rate_in_winners >= self.rate_in_losers {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub winners: usize,
    pub losers: usize,
    pub conditions_tested: usize,
    /// Too rare or too unbalanced for the chi-square approximation.
    pub conditions_excluded: usize,
    pub success_factors: Vec<PatternRecord>,
    pub failure_factors: Vec<PatternRecord>,
}

/// Finds generation-time conditions whose frequency differs between winners
/// and losers by more than chance.
#[derive(Debug, Clone)]
pub struct PatternAnalyzer {
    pub significance: f64,
    pub min_expected: f64,
    pub min_occurrences: usize,
    pub top_n: usize,
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self {
            significance: 0.05,
            min_expected: 5.0,
            min_occurrences: 5,
            top_n: 10,
        }
    }
}

impl PatternAnalyzer {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            significance: cfg.pattern_significance,
            min_expected: cfg.pattern_min_expected,
            min_occurrences: cfg.pattern_min_occurrences,
            top_n: cfg.pattern_top_n,
        }
    }

    pub fn analyze(&self, records: &[TradeRecord]) -> PatternAnalysis {
        let completed: Vec<(BTreeSet<(String, String)>, Outcome)> = records
            .iter()
            .filter_map(|r| Some((conditions(&r.signal), r.state.outcome()?)))
            .collect();

        let winners = completed.iter().filter(|(_, o)| *o == Outcome::Win).count();
        let losers = completed.len() - winners;

        // (dimension, value) -> (wins showing it, losses showing it)
        let mut counts: BTreeMap<(String, String), (usize, usize)> = BTreeMap::new();
        for (conds, outcome) in &completed {
            for cond in conds {
                let entry = counts.entry(cond.clone()).or_default();
                match outcome {
                    Outcome::Win => entry.0 += 1,
                    Outcome::Loss => entry.1 += 1,
                }
            }
        }

        let mut analysis = PatternAnalysis {
            winners,
            losers,
            ..PatternAnalysis::default()
        };
        let mut significant = Vec::new();

        for ((dimension, value), (wins, losses)) in counts {
            match self.test_condition(&dimension, &value, wins, losses, winners, losers) {
                Some(record) => {
                    analysis.conditions_tested += 1;
                    if record.significant {
                        significant.push(record);
                    }
                }
                None => analysis.conditions_excluded += 1,
            }
        }

        significant.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.predictive_power.total_cmp(&a.predictive_power))
                .then_with(|| a.condition().cmp(&b.condition()))
        });
        for record in significant {
            let list = match record.favours() {
                Outcome::Win => &mut analysis.success_factors,
                Outcome::Loss => &mut analysis.failure_factors,
            };
            if list.len() < self.top_n {
                list.push(record);
            }
        }

        debug!(
            "Pattern analysis: {} winners / {} losers, {} tested, {} excluded, {} + {} significant",
            winners,
            losers,
            analysis.conditions_tested,
            analysis.conditions_excluded,
            analysis.success_factors.len(),
            analysis.failure_factors.len()
        );
        analysis
    }

    /// `None` when the condition is untestable.
    fn test_condition(
        &self,
        dimension: &str,
        value: &str,
        wins: usize,
        losses: usize,
        winners: usize,
        losers: usize,
    ) -> Option<PatternRecord> {
        let occurrences = wins + losses;
        if occurrences < self.min_occurrences || winners == 0 || losers == 0 {
            return None;
        }
        let table = chi_square_2x2(wins, winners - wins, losses, losers - losses)?;
        if table.min_expected < self.min_expected {
            return None;
        }

        let rate_in_winners = wins as f64 / winners as f64;
        let rate_in_losers = losses as f64 / losers as f64;
        Some(PatternRecord {
            dimension: dimension.to_string(),
            value: value.to_string(),
            occurrences,
            wins,
            losses,
            rate_in_winners: round4(rate_in_winners),
            rate_in_losers: round4(rate_in_losers),
            predictive_power: round4((rate_in_winners - rate_in_losers).abs()),
            chi_square: round4(table.statistic),
            p_value: table.p_value,
            confidence: round4(1.0 - table.p_value),
            significant: table.p_value < self.significance,
        })
    }
}

/// Every (dimension, value) condition a signal carries.
fn conditions(signal: &TradeSignal) -> BTreeSet<(String, String)> {
    let mut out: BTreeSet<(String, String)> = DIMENSIONS
        .iter()
        .filter_map(|dim| extract_key(signal, dim).map(|v| (dim.to_string(), v)))
        .collect();
    for (key, value) in &signal.snapshot.labels {
        out.insert((format!("label:{}", key), value.clone()));
    }
    out
}

fn extract_key(signal: &TradeSignal, dimension: &str) -> Option<String> {
    let s = &signal.snapshot;
    match dimension {
        "rsi_bucket" => s.rsi.map(|rsi| {
            let bucket = if rsi < 30.0 {
                "oversold_<30"
            } else if rsi < 45.0 {
                "weak_30-45"
            } else if rsi <= 55.0 {
                "neutral_45-55"
            } else if rsi <= 70.0 {
                "strong_55-70"
            } else {
                "overbought_>70"
            };
            bucket.to_string()
        }),
        "macd_signal" => s.macd.map(|t| t.to_string()),
        "trend" => s.trend.map(|t| t.to_string()),
        "volume_regime" => s.volume_ratio.map(|v| {
            let regime = if v >= 1.5 {
                "high"
            } else if v <= 0.7 {
                "low"
            } else {
                "normal"
            };
            regime.to_string()
        }),
        "market_condition" => s
            .market_condition
            .as_ref()
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().to_lowercase()),
        "confidence_bucket" => Some(
            if signal.confidence >= 80.0 {
                "high_80+"
            } else if signal.confidence >= 60.0 {
                "mid_60-80"
            } else if signal.confidence >= 40.0 {
                "low_40-60"
            } else {
                "very_low_<40"
            }
            .to_string(),
        ),
        "session" => Some(session_at(signal.generated_at).to_string()),
        "day_of_week" => Some(day_of_week(signal.generated_at)),
        "timeframe" => Some(signal.timeframe.to_string()),
        "direction" => Some(signal.direction.to_string()),
        _ => None,
    }
}
