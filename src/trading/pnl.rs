use serde::{Deserialize, Serialize};

use crate::trading::evaluator::{TargetEvaluation, TerminalReason};
use crate::trading::signal::{Target, TradeSignal};

/// Standard position size every signal is measured against.
pub const DEFAULT_NOTIONAL_USD: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnL {
    pub realized_usd: f64,
    pub unrealized_usd: f64,
    pub net_usd: f64,
    pub net_percent: f64,
}

/// Converts target hits plus ladder allocations into P&L on a fixed notional.
#[derive(Debug, Clone, Copy)]
pub struct PnlCalculator {
    notional_usd: f64,
}

impl Default for PnlCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIONAL_USD)
    }
}

impl PnlCalculator {
    pub fn new(notional_usd: f64) -> Self {
        Self { notional_usd }
    }

    pub fn notional_usd(&self) -> f64 {
        self.notional_usd
    }

    /// P&L of `allocation_pct` of the notional closed at `exit`.
    fn contribution(&self, signal: &TradeSignal, allocation_pct: f64, exit: f64) -> f64 {
        let fraction = allocation_pct / 100.0;
        self.notional_usd * fraction * signal.direction.sign() * (exit - signal.entry_price)
            / signal.entry_price
    }

    /// `None` when P&L is undefined: incomplete data, or an open trade with no exits yet.
    pub fn compute(&self, signal: &TradeSignal, evaluation: &TargetEvaluation) -> Option<PnL> {
        if evaluation.terminal == Some(TerminalReason::IncompleteData) {
            return None;
        }

        let mut realized = 0.0;
        let mut closed_pct = 0.0;
        for (target, tp) in signal.ladder.levels() {
            if let Some(hit) = evaluation.hits.get(target) {
                realized += self.contribution(signal, tp.allocation_pct, hit.price);
                closed_pct += tp.allocation_pct;
            }
        }
        let open_pct = (100.0 - closed_pct).max(0.0);

        let mut unrealized = 0.0;
        match evaluation.terminal {
            Some(TerminalReason::StopLoss) => {
                let exit = evaluation
                    .hits
                    .get(Target::StopLoss)
                    .map_or(signal.stop_loss, |h| h.price);
                realized += self.contribution(signal, open_pct, exit);
            }
            Some(TerminalReason::Expired) => {
                let last = evaluation.last?;
                realized += self.contribution(signal, open_pct, last.price);
            }
            Some(TerminalReason::AllTargets) => {}
            Some(TerminalReason::IncompleteData) => return None,
            None => {
                if closed_pct == 0.0 {
                    return None;
                }
                if let Some(last) = evaluation.last {
                    unrealized = self.contribution(signal, open_pct, last.price);
                }
            }
        }

        let net = realized + unrealized;
        Some(PnL {
            realized_usd: round4(realized),
            unrealized_usd: round4(unrealized),
            net_usd: round4(net),
            net_percent: round4(net / self.notional_usd * 100.0),
        })
    }

    /// Whole-position move from entry to `price`, in percent.
    pub fn mark_to_market_pct(&self, signal: &TradeSignal, price: f64) -> f64 {
        round4(self.contribution(signal, 100.0, price) / self.notional_usd * 100.0)
    }
}

fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}
