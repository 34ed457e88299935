use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analytics::stats::{mean, pearson, round4, sample_std_dev};
use crate::models::Outcome;
use crate::trading::lifecycle::TradeStatus;
use crate::trading::pnl::DEFAULT_NOTIONAL_USD;
use crate::trading::signal::Target;
use crate::trading::store::TradeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    Strong,
    Moderate,
    Weak,
}

impl CorrelationStrength {
    pub fn classify(coefficient: f64) -> Self {
        let r = coefficient.abs();
        if r >= 0.5 {
            CorrelationStrength::Strong
        } else if r >= 0.3 {
            CorrelationStrength::Moderate
        } else {
            CorrelationStrength::Weak
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceCorrelation {
    pub coefficient: f64,
    pub strength: CorrelationStrength,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrentStreak {
    pub outcome: Outcome,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Streaks {
    pub longest_win: usize,
    pub longest_loss: usize,
    pub current: Option<CurrentStreak>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawdown {
    pub amount_usd: f64,
    /// Fraction of the peak, in percent.
    pub percent: f64,
    /// `None` when the peak is the starting baseline.
    pub peak_at: Option<DateTime<Utc>>,
    pub trough_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub days_to_recover: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub at: DateTime<Utc>,
    pub trade_id: String,
    pub pnl_usd: f64,
    pub equity_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitRates {
    pub evaluated: usize,
    pub tp1: Option<f64>,
    pub tp2: Option<f64>,
    pub tp3: Option<f64>,
    pub stop_loss: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Option<f64>,
    pub total_pnl_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedMetrics {
    /// Mean over sample standard deviation of per-trade % returns, un-annualized.
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: Option<Drawdown>,
    /// `f64::INFINITY` when there are profits and no losses.
    pub profit_factor: f64,
    pub expectancy_usd: Option<f64>,
    pub recovery_factor: Option<f64>,
    pub streaks: Streaks,
    pub confidence_correlation: Option<ConfidenceCorrelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub by_status: BTreeMap<String, usize>,
    pub wins: usize,
    pub losses: usize,
    /// Percent of completed trades that succeeded.
    pub success_rate: Option<f64>,

    /// Trades with realized P&L (completed or expired).
    pub closed_trades: usize,
    pub total_pnl_usd: f64,
    pub avg_win_usd: Option<f64>,
    pub avg_loss_usd: Option<f64>,
    pub best_trade_usd: Option<f64>,
    pub worst_trade_usd: Option<f64>,
    pub avg_duration_hours: Option<f64>,

    pub hit_rates: HitRates,
    pub by_symbol: BTreeMap<String, BreakdownStats>,
    pub by_timeframe: BTreeMap<String, BreakdownStats>,

    pub advanced: AdvancedMetrics,
    pub notional_usd: f64,
    pub equity_curve: Vec<EquityPoint>,
}

/// One trade with realized P&L, in completion order.
struct ClosedTrade<'a> {
    record: &'a TradeRecord,
    closed_at: DateTime<Utc>,
    pnl_usd: f64,
    pnl_pct: f64,
}

/// Pure roll-up of trade records into performance statistics.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceAggregator {
    notional_usd: f64,
}

impl Default for PerformanceAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIONAL_USD)
    }
}

impl PerformanceAggregator {
    pub fn new(notional_usd: f64) -> Self {
        Self { notional_usd }
    }

    pub fn compute(&self, records: &[TradeRecord]) -> PerformanceStats {
        let mut by_status: BTreeMap<String, usize> = TradeStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for r in records {
            *by_status.entry(r.status().to_string()).or_default() += 1;
        }

        let mut closed: Vec<ClosedTrade> = records
            .iter()
            .filter(|r| r.state.is_terminal())
            .filter_map(|r| {
                let pnl = r.state.pnl()?;
                Some(ClosedTrade {
                    record: r,
                    closed_at: r.state.closed_at()?,
                    pnl_usd: pnl.net_usd,
                    pnl_pct: pnl.net_percent,
                })
            })
            .collect();
        closed.sort_by(|a, b| {
            a.closed_at
                .cmp(&b.closed_at)
                .then_with(|| a.record.signal.id.cmp(&b.record.signal.id))
        });

        let outcomes: Vec<(&TradeRecord, Outcome)> = {
            let mut completed: Vec<&TradeRecord> =
                records.iter().filter(|r| r.state.outcome().is_some()).collect();
            completed.sort_by_key(|r| (r.state.closed_at(), r.signal.id.clone()));
            completed
                .into_iter()
                .filter_map(|r| r.state.outcome().map(|o| (r, o)))
                .collect()
        };
        let wins = outcomes.iter().filter(|(_, o)| *o == Outcome::Win).count();
        let losses = outcomes.len() - wins;

        let pnls: Vec<f64> = closed.iter().map(|t| t.pnl_usd).collect();
        let win_pnls: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let loss_pnls: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();
        let total_pnl: f64 = pnls.iter().sum();

        let durations: Vec<f64> = closed
            .iter()
            .filter_map(|t| t.record.state.result()?.duration_seconds)
            .map(|s| s as f64 / 3600.0)
            .collect();

        let equity_curve = self.equity_curve(&closed);
        let max_drawdown = self.max_drawdown(&equity_curve);
        let returns: Vec<f64> = closed.iter().map(|t| t.pnl_pct).collect();
        let outcome_seq: Vec<Outcome> = outcomes.iter().map(|(_, o)| *o).collect();

        let advanced = AdvancedMetrics {
            sharpe_ratio: sharpe_ratio(&returns),
            recovery_factor: max_drawdown
                .as_ref()
                .filter(|dd| dd.amount_usd > 0.0)
                .map(|dd| round4(total_pnl / dd.amount_usd)),
            max_drawdown,
            profit_factor: profit_factor(&pnls),
            expectancy_usd: mean(&pnls).map(round4),
            streaks: streaks(&outcome_seq),
            confidence_correlation: confidence_correlation(&outcomes),
        };

        PerformanceStats {
            total_trades: records.len(),
            by_status,
            wins,
            losses,
            success_rate: success_rate(wins, losses),
            closed_trades: closed.len(),
            total_pnl_usd: round4(total_pnl),
            avg_win_usd: mean(&win_pnls).map(round4),
            avg_loss_usd: mean(&loss_pnls).map(round4),
            best_trade_usd: pnls.iter().copied().reduce(f64::max),
            worst_trade_usd: pnls.iter().copied().reduce(f64::min),
            avg_duration_hours: mean(&durations).map(round4),
            hit_rates: hit_rates(records),
            by_symbol: breakdown(records, |r| r.signal.symbol.clone()),
            by_timeframe: breakdown(records, |r| r.signal.timeframe.to_string()),
            advanced,
            notional_usd: self.notional_usd,
            equity_curve,
        }
    }

    /// Cumulative P&L on top of one notional, in completion order.
    fn equity_curve(&self, closed: &[ClosedTrade]) -> Vec<EquityPoint> {
        let mut equity = self.notional_usd;
        closed
            .iter()
            .map(|t| {
                equity += t.pnl_usd;
                EquityPoint {
                    at: t.closed_at,
                    trade_id: t.record.signal.id.clone(),
                    pnl_usd: t.pnl_usd,
                    equity_usd: round4(equity),
                }
            })
            .collect()
    }

    fn max_drawdown(&self, curve: &[EquityPoint]) -> Option<Drawdown> {
        let mut peak = self.notional_usd;
        let mut peak_at: Option<DateTime<Utc>> = None;
        // (trough index, fraction of peak, amount, peak, peak time)
        let mut worst: Option<(usize, f64, f64, f64, Option<DateTime<Utc>>)> = None;

        for (i, point) in curve.iter().enumerate() {
            if point.equity_usd > peak {
                peak = point.equity_usd;
                peak_at = Some(point.at);
                continue;
            }
            let dd = peak - point.equity_usd;
            if dd <= 0.0 || peak <= 0.0 {
                continue;
            }
            let ratio = dd / peak;
            if worst.map_or(true, |(_, w, _, _, _)| ratio > w) {
                worst = Some((i, ratio, dd, peak, peak_at));
            }
        }

        let (trough_idx, _, amount, peak_value, peak_at) = worst?;
        let trough = &curve[trough_idx];
        let recovered_at = curve[trough_idx + 1..]
            .iter()
            .find(|p| p.equity_usd >= peak_value)
            .map(|p| p.at);

        Some(Drawdown {
            amount_usd: round4(amount),
            percent: round4(amount / peak_value * 100.0),
            peak_at,
            trough_at: trough.at,
            recovered_at,
            days_to_recover: recovered_at
                .map(|at| round4((at - trough.at).num_seconds() as f64 / 86_400.0)),
        })
    }
}

fn success_rate(wins: usize, losses: usize) -> Option<f64> {
    let decided = wins + losses;
    if decided == 0 {
        return None;
    }
    Some(round4(wins as f64 / decided as f64 * 100.0))
}

fn sharpe_ratio(returns: &[f64]) -> Option<f64> {
    let sd = sample_std_dev(returns)?;
    if sd == 0.0 {
        return None;
    }
    Some(round4(mean(returns)? / sd))
}

pub fn profit_factor(pnls: &[f64]) -> f64 {
    let gross_profit: f64 = pnls.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|p| **p < 0.0).sum::<f64>().abs();
    if gross_loss > 0.0 {
        round4(gross_profit / gross_loss)
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

pub fn streaks(outcomes: &[Outcome]) -> Streaks {
    let mut result = Streaks::default();
    let mut current: Option<CurrentStreak> = None;

    for &outcome in outcomes {
        let length = match current {
            Some(s) if s.outcome == outcome => s.length + 1,
            _ => 1,
        };
        current = Some(CurrentStreak { outcome, length });
        match outcome {
            Outcome::Win => result.longest_win = result.longest_win.max(length),
            Outcome::Loss => result.longest_loss = result.longest_loss.max(length),
        }
    }

    result.current = current;
    result
}

fn confidence_correlation(outcomes: &[(&TradeRecord, Outcome)]) -> Option<ConfidenceCorrelation> {
    let confidence: Vec<f64> = outcomes.iter().map(|(r, _)| r.signal.confidence).collect();
    let won: Vec<f64> = outcomes
        .iter()
        .map(|(_, o)| if *o == Outcome::Win { 1.0 } else { 0.0 })
        .collect();
    let coefficient = round4(pearson(&confidence, &won)?);
    Some(ConfidenceCorrelation {
        coefficient,
        strength: CorrelationStrength::classify(coefficient),
        samples: outcomes.len(),
    })
}

fn hit_rates(records: &[TradeRecord]) -> HitRates {
    let results: Vec<_> = records.iter().filter_map(|r| r.state.result()).collect();
    let evaluated = results.len();
    let rate = |target: Target| {
        if evaluated == 0 {
            return None;
        }
        let hits = results.iter().filter(|r| r.hits.is_hit(target)).count();
        Some(round4(hits as f64 / evaluated as f64 * 100.0))
    };
    HitRates {
        evaluated,
        tp1: rate(Target::Tp1),
        tp2: rate(Target::Tp2),
        tp3: rate(Target::Tp3),
        stop_loss: rate(Target::StopLoss),
    }
}

fn breakdown(
    records: &[TradeRecord],
    key: impl Fn(&TradeRecord) -> String,
) -> BTreeMap<String, BreakdownStats> {
    let mut out: BTreeMap<String, BreakdownStats> = BTreeMap::new();
    for r in records {
        let entry = out.entry(key(r)).or_default();
        entry.trades += 1;
        match r.state.outcome() {
            Some(Outcome::Win) => entry.wins += 1,
            Some(Outcome::Loss) => entry.losses += 1,
            None => {}
        }
        if r.state.is_terminal() {
            if let Some(pnl) = r.state.pnl() {
                entry.total_pnl_usd += pnl.net_usd;
            }
        }
    }
    for stats in out.values_mut() {
        stats.win_rate = success_rate(stats.wins, stats.losses);
        stats.total_pnl_usd = round4(stats.total_pnl_usd);
    }
    out
}
