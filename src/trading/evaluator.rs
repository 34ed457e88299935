use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::models::{Direction, PriceSample};
use crate::trading::signal::{Target, TargetLadder};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetHit {
    pub at: DateTime<Utc>,
    pub price: f64,
}

/// Last observed price, used to mark or close any open allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetHits {
    #[serde(default)]
    pub tp1: Option<TargetHit>,
    #[serde(default)]
    pub tp2: Option<TargetHit>,
    #[serde(default)]
    pub tp3: Option<TargetHit>,
    #[serde(default)]
    pub stop_loss: Option<TargetHit>,
}

impl TargetHits {
    pub fn get(&self, target: Target) -> Option<&TargetHit> {
        match target {
            Target::Tp1 => self.tp1.as_ref(),
            Target::Tp2 => self.tp2.as_ref(),
            Target::Tp3 => self.tp3.as_ref(),
            Target::StopLoss => self.stop_loss.as_ref(),
        }
    }

    fn set(&mut self, target: Target, hit: TargetHit) {
        let slot = match target {
            Target::Tp1 => &mut self.tp1,
            Target::Tp2 => &mut self.tp2,
            Target::Tp3 => &mut self.tp3,
            Target::StopLoss => &mut self.stop_loss,
        };
        *slot = Some(hit);
    }

    pub fn is_hit(&self, target: Target) -> bool {
        self.get(target).is_some()
    }

    pub fn take_profits_hit(&self) -> usize {
        Target::TAKE_PROFITS
            .iter()
            .filter(|t| self.is_hit(**t))
            .count()
    }

    pub fn all_take_profits_hit(&self) -> bool {
        self.take_profits_hit() == Target::TAKE_PROFITS.len()
    }

    /// Hit targets in ladder order, stop-loss last.
    pub fn hit_targets(&self) -> Vec<(Target, TargetHit)> {
        [Target::Tp1, Target::Tp2, Target::Tp3, Target::StopLoss]
            .iter()
            .filter_map(|t| self.get(*t).map(|h| (*t, *h)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    StopLoss,
    AllTargets,
    Expired,
    IncompleteData,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::StopLoss => write!(f, "stop_loss"),
            TerminalReason::AllTargets => write!(f, "all_targets"),
            TerminalReason::Expired => write!(f, "expired"),
            TerminalReason::IncompleteData => write!(f, "incomplete_data"),
        }
    }
}

/// Where a previous evaluation stopped. Resuming from it only looks at newer samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCursor {
    pub hits: TargetHits,
    pub last: Option<PricePoint>,
    pub samples_seen: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetEvaluation {
    pub hits: TargetHits,
    /// `None` while the window is still open and targets remain.
    pub terminal: Option<TerminalReason>,
    pub last: Option<PricePoint>,
    pub samples_seen: usize,
    /// Targets hit during this call, in the order they were resolved.
    pub new_hits: Vec<(Target, TargetHit)>,
}

impl TargetEvaluation {
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    pub fn cursor(&self) -> EvaluationCursor {
        EvaluationCursor {
            hits: self.hits.clone(),
            last: self.last,
            samples_seen: self.samples_seen,
        }
    }

    /// Whether this evaluation saw at least what `earlier` saw: as many samples
    /// and every target it had already recorded.
    pub fn covers(&self, earlier: &EvaluationCursor) -> bool {
        self.samples_seen >= earlier.samples_seen
            && earlier
                .hits
                .hit_targets()
                .iter()
                .all(|(target, _)| self.hits.is_hit(*target))
    }
}

/// Walks a price path against a target ladder.
#[derive(Debug, Clone, Copy)]
pub struct TargetEvaluator {
    direction: Direction,
}

impl TargetEvaluator {
    pub fn new(direction: Direction) -> Self {
        Self { direction }
    }

    /// Evaluate from scratch. `window_closed` means the samples reach expiration.
    pub fn evaluate(
        &self,
        ladder: &TargetLadder,
        stop_loss: f64,
        samples: &[PriceSample],
        window_closed: bool,
    ) -> TargetEvaluation {
        self.resume(
            ladder,
            stop_loss,
            EvaluationCursor::default(),
            samples,
            window_closed,
        )
    }

    /// Continue from `cursor`, ignoring samples before its last timestamp. A bar
    /// stamped exactly at the cursor is checked again, since it may have still
    /// been forming when it was first seen.
    pub fn resume(
        &self,
        ladder: &TargetLadder,
        stop_loss: f64,
        cursor: EvaluationCursor,
        samples: &[PriceSample],
        window_closed: bool,
    ) -> TargetEvaluation {
        let EvaluationCursor {
            mut hits,
            mut last,
            mut samples_seen,
        } = cursor;
        let mut new_hits = Vec::new();

        let mut terminal = if hits.stop_loss.is_some() {
            Some(TerminalReason::StopLoss)
        } else if hits.all_take_profits_hit() {
            Some(TerminalReason::AllTargets)
        } else {
            None
        };

        if terminal.is_none() {
            for sample in samples {
                let revisit = match last {
                    Some(prev) if sample.timestamp < prev.at => continue,
                    Some(prev) if sample.timestamp == prev.at => {
                        if !sample.is_bar() {
                            continue;
                        }
                        true
                    }
                    _ => false,
                };
                if !revisit {
                    samples_seen += 1;
                }
                last = Some(PricePoint {
                    at: sample.timestamp,
                    price: sample.close,
                });

                // Intrabar order is unknown: a stop touch in the same sample wins.
                if self.touches_stop(sample, stop_loss) {
                    let hit = TargetHit {
                        at: sample.timestamp,
                        price: stop_loss,
                    };
                    hits.set(Target::StopLoss, hit);
                    new_hits.push((Target::StopLoss, hit));
                    debug!("stop-loss {} touched at {}", stop_loss, sample.timestamp);
                    terminal = Some(TerminalReason::StopLoss);
                    break;
                }

                for (target, tp) in ladder.levels() {
                    if hits.is_hit(target) {
                        continue;
                    }
                    if !self.touches_take_profit(sample, tp.price) {
                        // A later level cannot be reached without crossing this one
                        break;
                    }
                    let hit = TargetHit {
                        at: sample.timestamp,
                        price: tp.price,
                    };
                    hits.set(target, hit);
                    new_hits.push((target, hit));
                    debug!("{} {} touched at {}", target, tp.price, sample.timestamp);
                }

                if hits.all_take_profits_hit() {
                    terminal = Some(TerminalReason::AllTargets);
                    break;
                }
            }
        }

        if terminal.is_none() && window_closed {
            terminal = Some(if samples_seen == 0 {
                TerminalReason::IncompleteData
            } else {
                TerminalReason::Expired
            });
        }

        TargetEvaluation {
            hits,
            terminal,
            last,
            samples_seen,
            new_hits,
        }
    }

    fn touches_take_profit(&self, sample: &PriceSample, level: f64) -> bool {
        let best = match self.direction {
            Direction::Long => sample.high_or_close(),
            Direction::Short => sample.low_or_close(),
        };
        self.direction.reached(best, level)
    }

    fn touches_stop(&self, sample: &PriceSample, stop_loss: f64) -> bool {
        match self.direction {
            Direction::Long => sample.low_or_close() <= stop_loss,
            Direction::Short => sample.high_or_close() >= stop_loss,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, make_bars, make_ticks, sample_ladder};
    use crate::trading::signal::TakeProfit;

    fn long() -> TargetEvaluator {
        TargetEvaluator::new(Direction::Long)
    }

    #[test]
    fn tp1_then_stop_terminates_on_stop() {
        let samples = make_ticks(&[101.0, 106.0, 103.0, 96.0, 94.0, 130.0]);
        let eval = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        assert_eq!(eval.terminal, Some(TerminalReason::StopLoss));
        assert!(eval.hits.is_hit(Target::Tp1));
        assert!(!eval.hits.is_hit(Target::Tp2));
        let sl = eval.hits.stop_loss.unwrap();
        assert_eq!(sl.price, 95.0);
        // The 130 tick after the stop is never looked at
        assert_eq!(eval.samples_seen, 5);
    }

    #[test]
    fn stop_wins_same_bar_tie() {
        // One bar spans both the stop (95) and TP1 (105)
        let samples = make_bars(&[(100.0, 106.0, 94.0, 100.0)]);
        let eval = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        assert_eq!(eval.terminal, Some(TerminalReason::StopLoss));
        assert!(!eval.hits.is_hit(Target::Tp1));
    }

    #[test]
    fn multiple_tps_in_one_bar_resolve_in_order() {
        let samples = make_bars(&[(100.0, 121.0, 99.0, 118.0)]);
        let eval = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        assert_eq!(eval.terminal, Some(TerminalReason::AllTargets));
        let order: Vec<Target> = eval.new_hits.iter().map(|(t, _)| *t).collect();
        assert_eq!(order, vec![Target::Tp1, Target::Tp2, Target::Tp3]);
    }

    #[test]
    fn hit_times_are_non_decreasing() {
        let samples = make_ticks(&[104.0, 105.5, 108.0, 110.0, 115.0, 121.0]);
        let eval = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        let tp1 = eval.hits.tp1.unwrap();
        let tp2 = eval.hits.tp2.unwrap();
        let tp3 = eval.hits.tp3.unwrap();
        assert!(tp1.at <= tp2.at && tp2.at <= tp3.at);
        assert_eq!(tp2.price, 110.0);
    }

    #[test]
    fn open_window_has_no_terminal_reason() {
        let samples = make_ticks(&[101.0, 106.0, 104.0]);
        let eval = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        assert_eq!(eval.terminal, None);
        assert_eq!(eval.last.unwrap().price, 104.0);
    }

    #[test]
    fn closed_window_with_data_expires() {
        let samples = make_ticks(&[101.0, 106.0, 104.0]);
        let eval = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), true);
        assert_eq!(eval.terminal, Some(TerminalReason::Expired));
    }

    #[test]
    fn closed_window_without_data_is_incomplete() {
        let eval = long().evaluate(&sample_ladder(), 95.0, &[], true);
        assert_eq!(eval.terminal, Some(TerminalReason::IncompleteData));
        assert!(eval.last.is_none());
    }

    #[test]
    fn resume_skips_already_seen_samples() {
        let samples = make_ticks(&[101.0, 106.0, 104.0, 111.0]);
        let first = long().evaluate(&sample_ladder(), 95.0, &samples.as_slice()[..3], false);
        assert_eq!(first.hits.take_profits_hit(), 1);

        let resumed = long().resume(
            &sample_ladder(),
            95.0,
            first.cursor(),
            samples.as_slice(),
            false,
        );
        assert_eq!(resumed.samples_seen, 4);
        assert_eq!(resumed.new_hits.len(), 1);
        assert_eq!(resumed.new_hits[0].0, Target::Tp2);
        assert_eq!(resumed.hits.tp1, first.hits.tp1);
    }

    #[test]
    fn resume_rechecks_bar_at_cursor() {
        let forming = make_bars(&[(100.0, 101.0, 99.5, 100.5)]);
        let first = long().evaluate(&sample_ladder(), 95.0, forming.as_slice(), false);
        assert_eq!(first.terminal, None);

        // Same bar once it closed, with a low through the stop
        let closed = make_bars(&[(100.0, 101.0, 94.0, 96.0)]);
        let resumed = long().resume(
            &sample_ladder(),
            95.0,
            first.cursor(),
            closed.as_slice(),
            false,
        );
        assert_eq!(resumed.terminal, Some(TerminalReason::StopLoss));
        assert_eq!(resumed.samples_seen, 1);
        assert_eq!(resumed.last.unwrap().price, 96.0);
    }

    #[test]
    fn resume_skips_tick_at_cursor() {
        let samples = make_ticks(&[101.0, 106.0]);
        let first = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        let resumed = long().resume(
            &sample_ladder(),
            95.0,
            first.cursor(),
            &samples.as_slice()[1..],
            false,
        );
        assert_eq!(resumed.samples_seen, 2);
        assert!(resumed.new_hits.is_empty());
    }

    #[test]
    fn covers_requires_every_earlier_hit() {
        let samples = make_ticks(&[101.0, 106.0]);
        let earlier = long()
            .evaluate(&sample_ladder(), 95.0, samples.as_slice(), false)
            .cursor();
        let shorter = long().evaluate(&sample_ladder(), 95.0, &samples.as_slice()[..1], false);
        assert!(!shorter.covers(&earlier));
        let same = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        assert!(same.covers(&earlier));
    }

    #[test]
    fn resume_from_terminal_cursor_is_inert() {
        let samples = make_ticks(&[94.0]);
        let first = long().evaluate(&sample_ladder(), 95.0, samples.as_slice(), false);
        let later = make_ticks(&[200.0]);
        let resumed = long().resume(&sample_ladder(), 95.0, first.cursor(), later.as_slice(), true);
        assert_eq!(resumed.terminal, Some(TerminalReason::StopLoss));
        assert!(resumed.new_hits.is_empty());
    }

    #[test]
    fn short_position_mirrors_comparisons() {
        let ladder = TargetLadder::new(
            TakeProfit::new(95.0, 50.0),
            TakeProfit::new(90.0, 30.0),
            TakeProfit::new(80.0, 20.0),
        );
        let samples = make_ticks(&[99.0, 94.0, 98.0, 106.0]);
        let eval = TargetEvaluator::new(Direction::Short).evaluate(
            &ladder,
            105.0,
            samples.as_slice(),
            false,
        );
        assert!(eval.hits.is_hit(Target::Tp1));
        assert_eq!(eval.terminal, Some(TerminalReason::StopLoss));
        assert_eq!(eval.hits.stop_loss.unwrap().at, base_time() + chrono::Duration::minutes(3));
    }
}
