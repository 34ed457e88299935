use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Result, VerifyError};
use crate::models::{Outcome, PriceSeries};
use crate::prices::PriceHistoryProvider;
use crate::trading::evaluator::{
    EvaluationCursor, PricePoint, TargetEvaluation, TargetEvaluator, TargetHit, TargetHits,
    TerminalReason,
};
use crate::trading::pnl::{PnL, PnlCalculator};
use crate::trading::signal::{SignalRequest, Target, TradeId, TradeSignal};
use crate::trading::store::{TradeRecord, TradeScope, TradeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Active,
    CompletedSuccess,
    CompletedFailure,
    Expired,
    IncompleteData,
}

impl TradeStatus {
    pub const ALL: [TradeStatus; 5] = [
        TradeStatus::Active,
        TradeStatus::CompletedSuccess,
        TradeStatus::CompletedFailure,
        TradeStatus::Expired,
        TradeStatus::IncompleteData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Active => "active",
            TradeStatus::CompletedSuccess => "completed_success",
            TradeStatus::CompletedFailure => "completed_failure",
            TradeStatus::Expired => "expired",
            TradeStatus::IncompleteData => "incomplete_data",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Active)
    }

    pub fn from_str_loose(s: &str) -> Option<TradeStatus> {
        let s = s.trim().to_lowercase();
        TradeStatus::ALL.into_iter().find(|st| st.as_str() == s)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do with a trade whose window closed with targets still open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Success when net P&L >= 0, failure otherwise.
    #[default]
    ByPnl,
    /// Park the trade in the `expired` status.
    MarkExpired,
}

/// Where the prices came from and how complete they looked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub source: String,
    pub samples: usize,
    /// Spacings wider than twice the median spacing.
    pub gaps: usize,
    pub first_sample_at: Option<DateTime<Utc>>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub evaluated_at: DateTime<Utc>,
}

impl DataQuality {
    pub fn empty(source: &str, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            source: source.to_string(),
            samples: 0,
            gaps: 0,
            first_sample_at: None,
            last_sample_at: None,
            evaluated_at,
        }
    }

    /// Fold a freshly fetched series into what was known before.
    fn extend(&self, source: &str, series: &PriceSeries, evaluated_at: DateTime<Utc>) -> Self {
        let first = series.first().map(|s| s.timestamp);
        let last = series.last().map(|s| s.timestamp);
        Self {
            source: source.to_string(),
            samples: self.samples + series.len(),
            gaps: self.gaps + series.gap_count(),
            first_sample_at: self.first_sample_at.or(first),
            last_sample_at: last.or(self.last_sample_at),
            evaluated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub hits: TargetHits,
    /// Absent until a partial exit or a terminal state.
    pub pnl: Option<PnL>,
    pub last_price: Option<PricePoint>,
    pub samples_seen: usize,
    #[serde(default)]
    pub terminal_reason: Option<TerminalReason>,
    /// Generation to close, for terminal trades.
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    pub data: DataQuality,
}

impl TradeResult {
    pub fn cursor(&self) -> EvaluationCursor {
        EvaluationCursor {
            hits: self.hits.clone(),
            last: self.last_price,
            samples_seen: self.samples_seen,
        }
    }

    fn same_outcome(&self, other: &TradeResult) -> bool {
        self.hits == other.hits
            && self.pnl == other.pnl
            && self.last_price == other.last_price
            && self.terminal_reason == other.terminal_reason
    }
}

/// Lifecycle state. Each variant carries only the fields valid for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TradeState {
    Active {
        #[serde(default)]
        progress: Option<TradeResult>,
    },
    CompletedSuccess {
        result: TradeResult,
        closed_at: DateTime<Utc>,
    },
    CompletedFailure {
        result: TradeResult,
        closed_at: DateTime<Utc>,
    },
    Expired {
        result: TradeResult,
        closed_at: DateTime<Utc>,
    },
    IncompleteData {
        checked_at: DateTime<Utc>,
        data: DataQuality,
    },
}

impl TradeState {
    pub fn initial() -> Self {
        TradeState::Active { progress: None }
    }

    pub fn status(&self) -> TradeStatus {
        match self {
            TradeState::Active { .. } => TradeStatus::Active,
            TradeState::CompletedSuccess { .. } => TradeStatus::CompletedSuccess,
            TradeState::CompletedFailure { .. } => TradeStatus::CompletedFailure,
            TradeState::Expired { .. } => TradeStatus::Expired,
            TradeState::IncompleteData { .. } => TradeStatus::IncompleteData,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Latest evaluation result, including progress of an active trade.
    pub fn result(&self) -> Option<&TradeResult> {
        match self {
            TradeState::Active { progress } => progress.as_ref(),
            TradeState::CompletedSuccess { result, .. }
            | TradeState::CompletedFailure { result, .. }
            | TradeState::Expired { result, .. } => Some(result),
            TradeState::IncompleteData { .. } => None,
        }
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TradeState::CompletedSuccess { closed_at, .. }
            | TradeState::CompletedFailure { closed_at, .. }
            | TradeState::Expired { closed_at, .. } => Some(*closed_at),
            TradeState::IncompleteData { checked_at, .. } => Some(*checked_at),
            TradeState::Active { .. } => None,
        }
    }

    /// Win or loss, for the two completed statuses only.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            TradeState::CompletedSuccess { .. } => Some(Outcome::Win),
            TradeState::CompletedFailure { .. } => Some(Outcome::Loss),
            _ => None,
        }
    }

    pub fn pnl(&self) -> Option<&PnL> {
        self.result().and_then(|r| r.pnl.as_ref())
    }

    fn cursor(&self) -> EvaluationCursor {
        self.result().map(|r| r.cursor()).unwrap_or_default()
    }

    fn data(&self) -> Option<&DataQuality> {
        match self {
            TradeState::IncompleteData { data, .. } => Some(data),
            _ => self.result().map(|r| &r.data),
        }
    }

    /// Equal apart from evaluation timestamps.
    fn same_outcome(&self, other: &TradeState) -> bool {
        if self.status() != other.status() {
            return false;
        }
        match (self.result(), other.result()) {
            (Some(a), Some(b)) => a.same_outcome(b),
            (None, None) => true,
            _ => false,
        }
    }
}

/// Map an evaluation onto the next lifecycle state.
pub fn next_state(
    signal: &TradeSignal,
    evaluation: &TargetEvaluation,
    pnl: Option<PnL>,
    data: DataQuality,
    policy: ExpiryPolicy,
    now: DateTime<Utc>,
) -> TradeState {
    let closed_at = match evaluation.terminal {
        Some(TerminalReason::StopLoss) => evaluation.hits.stop_loss.map(|h| h.at),
        Some(TerminalReason::AllTargets) => evaluation.hits.tp3.map(|h| h.at),
        Some(TerminalReason::Expired) => Some(signal.expires_at),
        _ => None,
    };

    let result = TradeResult {
        hits: evaluation.hits.clone(),
        pnl,
        last_price: evaluation.last,
        samples_seen: evaluation.samples_seen,
        terminal_reason: evaluation.terminal,
        duration_seconds: closed_at.map(|at| (at - signal.generated_at).num_seconds()),
        data: data.clone(),
    };

    match (evaluation.terminal, closed_at) {
        (Some(TerminalReason::IncompleteData), _) => TradeState::IncompleteData {
            checked_at: now,
            data,
        },
        (Some(TerminalReason::StopLoss), Some(closed_at)) => {
            TradeState::CompletedFailure { result, closed_at }
        }
        (Some(TerminalReason::AllTargets), Some(closed_at)) => {
            TradeState::CompletedSuccess { result, closed_at }
        }
        (Some(TerminalReason::Expired), Some(closed_at)) => match policy {
            ExpiryPolicy::MarkExpired => TradeState::Expired { result, closed_at },
            ExpiryPolicy::ByPnl => {
                if result.pnl.map_or(0.0, |p| p.net_usd) >= 0.0 {
                    TradeState::CompletedSuccess { result, closed_at }
                } else {
                    TradeState::CompletedFailure { result, closed_at }
                }
            }
        },
        _ => TradeState::Active {
            progress: (evaluation.samples_seen > 0).then_some(result),
        },
    }
}

/// Outcome of one evaluation pass over a single trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub trade_id: TradeId,
    pub symbol: String,
    pub from: TradeStatus,
    pub to: TradeStatus,
    /// Targets that were not hit in the stored result before this pass.
    pub new_hits: Vec<(Target, TargetHit)>,
    pub pnl: Option<PnL>,
    pub last_price: Option<PricePoint>,
    /// Whether a new state was committed.
    pub changed: bool,
}

impl Transition {
    fn unchanged(record: &TradeRecord) -> Self {
        let result = record.state.result();
        Self {
            trade_id: record.signal.id.clone(),
            symbol: record.signal.symbol.clone(),
            from: record.status(),
            to: record.status(),
            new_hits: Vec::new(),
            pnl: result.and_then(|r| r.pnl),
            last_price: result.and_then(|r| r.last_price),
            changed: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.to.is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeError {
    pub trade_id: TradeId,
    pub symbol: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationSummary {
    pub verified: usize,
    pub updated: usize,
    pub errors: Vec<TradeError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Re-walk the whole window from generation time.
    Full,
    /// Walk only samples after the stored cursor.
    Incremental,
}

/// Owns every status change. Evaluates trades against fetched prices and
/// commits the result to the store in one write.
pub struct TradeLifecycleManager {
    store: Arc<dyn TradeStore>,
    prices: Arc<dyn PriceHistoryProvider>,
    clock: Arc<dyn Clock>,
    pnl: PnlCalculator,
    expiry_policy: ExpiryPolicy,
}

impl TradeLifecycleManager {
    pub fn new(
        store: Arc<dyn TradeStore>,
        prices: Arc<dyn PriceHistoryProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            prices,
            clock,
            pnl: PnlCalculator::default(),
            expiry_policy: ExpiryPolicy::default(),
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<dyn TradeStore>,
        prices: Arc<dyn PriceHistoryProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(store, prices, clock)
            .with_pnl(PnlCalculator::new(cfg.notional_usd))
            .with_expiry_policy(cfg.expiry_policy)
    }

    pub fn with_pnl(mut self, pnl: PnlCalculator) -> Self {
        self.pnl = pnl;
        self
    }

    pub fn with_expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn TradeStore> {
        &self.store
    }

    pub fn pnl_calculator(&self) -> &PnlCalculator {
        &self.pnl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Validate and persist a new signal in the `active` state.
    pub async fn register(&self, req: SignalRequest) -> Result<TradeRecord> {
        let signal = TradeSignal::create(req)?;
        let record = self.store.insert(signal).await?;
        info!(
            "Registered {} {} {} @ {} (expires {})",
            record.signal.id,
            record.signal.symbol,
            record.signal.direction,
            record.signal.entry_price,
            record.signal.expires_at
        );
        Ok(record)
    }

    /// Register a batch, skipping (and logging) rejected or duplicate signals.
    pub async fn import(&self, requests: Vec<SignalRequest>) -> usize {
        let mut registered = 0;
        for req in requests {
            let id = req.id.clone();
            match self.register(req).await {
                Ok(_) => registered += 1,
                Err(e) => warn!("Skipping signal {}: {}", id, e),
            }
        }
        registered
    }

    /// Re-evaluate the whole window. A no-op for terminal trades.
    pub async fn verify(&self, id: &str) -> Result<Transition> {
        self.evaluate(id, Pass::Full).await
    }

    /// Evaluate only samples newer than the last check.
    pub async fn advance(&self, id: &str) -> Result<Transition> {
        self.evaluate(id, Pass::Incremental).await
    }

    /// Verify every non-terminal trade in scope, collecting per-trade errors.
    pub async fn verify_all(&self, scope: &TradeScope) -> Result<VerificationSummary> {
        let records = self.store.list(scope).await?;
        let mut summary = VerificationSummary::default();

        for record in records.iter().filter(|r| !r.state.is_terminal()) {
            summary.verified += 1;
            match self.verify(record.id()).await {
                Ok(t) if t.changed => summary.updated += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!("Verification failed for {}: {}", record.id(), e);
                    summary.errors.push(TradeError {
                        trade_id: record.signal.id.clone(),
                        symbol: record.signal.symbol.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Verified {} trades: {} updated, {} errors",
            summary.verified,
            summary.updated,
            summary.errors.len()
        );
        Ok(summary)
    }

    async fn evaluate(&self, id: &str, pass: Pass) -> Result<Transition> {
        let mut retried = false;
        loop {
            let record = self.store.get(id).await?;
            if record.state.is_terminal() {
                debug!("{} already {}, skipping", id, record.status());
                return Ok(Transition::unchanged(&record));
            }

            let now = self.clock.now();
            let next = self.compute(&record, pass, now).await?;
            let Some((state, new_hits)) = next else {
                return Ok(Transition::unchanged(&record));
            };

            match self.store.commit(id, record.version, state, now).await {
                Ok(updated) => {
                    let transition = Transition {
                        trade_id: updated.signal.id.clone(),
                        symbol: updated.signal.symbol.clone(),
                        from: record.status(),
                        to: updated.status(),
                        new_hits,
                        pnl: updated.state.pnl().copied(),
                        last_price: updated.state.result().and_then(|r| r.last_price),
                        changed: true,
                    };
                    log_transition(&transition);
                    return Ok(transition);
                }
                Err(e)
                    if !retried
                        && matches!(
                            e,
                            VerifyError::ConcurrentEvaluationConflict { .. }
                                | VerifyError::TerminalState(_)
                        ) =>
                {
                    warn!("{}; re-reading {} and retrying once", e, id);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Next state plus newly hit targets, or `None` when nothing changed.
    async fn compute(
        &self,
        record: &TradeRecord,
        pass: Pass,
        now: DateTime<Utc>,
    ) -> Result<Option<(TradeState, Vec<(Target, TargetHit)>)>> {
        let signal = &record.signal;
        let stored = record.state.cursor();
        let stored_data = record.state.data().cloned();
        let source = self.prices.name();

        let from = match pass {
            Pass::Full => signal.generated_at,
            Pass::Incremental => stored.last.map_or(signal.generated_at, |p| p.at),
        };
        let to = signal.window_end(now);
        let window_closed = signal.is_expired(now);

        let series = if to >= from {
            self.prices
                .get_prices(&signal.symbol, from, to)
                .await?
                .within(signal.generated_at, signal.expires_at)
        } else {
            PriceSeries::default()
        };
        debug!(
            "{}: {} samples from {} for {}..{}",
            signal.id,
            series.len(),
            source,
            from,
            to
        );

        if series.is_empty() && !window_closed {
            if pass == Pass::Full && stored.samples_seen == 0 {
                return Err(VerifyError::DataUnavailable {
                    symbol: signal.symbol.clone(),
                    from,
                    to,
                });
            }
            return Ok(None);
        }

        let evaluator = TargetEvaluator::new(signal.direction);
        let walk = |cursor: EvaluationCursor, samples: &PriceSeries| {
            evaluator.resume(
                &signal.ladder,
                signal.stop_loss,
                cursor,
                samples.as_slice(),
                window_closed,
            )
        };
        // Continue from what was stored: the bar at the cursor is re-checked,
        // but only strictly newer samples count toward data quality.
        let continue_stored = |series: &PriceSeries| {
            let (since, newer) = match stored.last {
                Some(last) => (series.since(last.at), series.after(last.at)),
                None => (series.clone(), series.clone()),
            };
            let data = stored_data
                .clone()
                .unwrap_or_else(|| DataQuality::empty(source, now))
                .extend(source, &newer, now);
            (walk(stored.clone(), &since), data)
        };

        let (evaluation, data) = match pass {
            Pass::Incremental => continue_stored(&series),
            Pass::Full => {
                let fresh = walk(EvaluationCursor::default(), &series);
                if fresh.covers(&stored) {
                    let data = DataQuality::empty(source, now).extend(source, &series, now);
                    (fresh, data)
                } else {
                    warn!(
                        "{}: re-fetch saw {} samples / {} targets, stored {} / {}; keeping stored progress",
                        signal.id,
                        fresh.samples_seen,
                        fresh.hits.hit_targets().len(),
                        stored.samples_seen,
                        stored.hits.hit_targets().len()
                    );
                    continue_stored(&series)
                }
            }
        };
        let pnl = self.pnl.compute(signal, &evaluation);

        let state = next_state(signal, &evaluation, pnl, data, self.expiry_policy, now);
        if state.same_outcome(&record.state) {
            return Ok(None);
        }

        let before = record.state.result().map(|r| r.hits.clone()).unwrap_or_default();
        let new_hits = evaluation
            .hits
            .hit_targets()
            .into_iter()
            .filter(|(t, _)| !before.is_hit(*t))
            .collect();
        Ok(Some((state, new_hits)))
    }
}

fn log_transition(t: &Transition) {
    for (target, hit) in &t.new_hits {
        info!("{} {} hit {} at {} ({})", t.trade_id, t.symbol, target, hit.price, hit.at);
    }
    if t.from != t.to {
        let pnl = t
            .pnl
            .map(|p| format!("{:+.2}%", p.net_percent))
            .unwrap_or_else(|| "n/a".to_string());
        info!("{} {}: {} -> {} (P&L {})", t.trade_id, t.symbol, t.from, t.to, pnl);
    }
}
