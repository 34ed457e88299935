use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SharedConfig};
use crate::error::Result;
use crate::trading::lifecycle::{TradeError, TradeLifecycleManager, TradeStatus, Transition};
use crate::trading::signal::{Target, TradeId, TradeSignal};
use crate::trading::store::{TradeRecord, TradeScope};

const NOTIFICATION_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TargetHit,
    SignificantPnlChange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub trade_id: TradeId,
    pub symbol: String,
    pub target: Option<Target>,
    pub price: f64,
    pub at: DateTime<Utc>,
    pub pnl_percent: Option<f64>,
    pub status: TradeStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub active: usize,
    pub checked: usize,
    /// Already being evaluated by an overlapping sweep.
    pub skipped: usize,
    pub updated: usize,
    pub closed: usize,
    pub notifications: usize,
    pub errors: Vec<TradeError>,
}

enum CheckOutcome {
    Skipped,
    Checked {
        transition: Transition,
        notifications: usize,
    },
}

/// Removes the trade from the in-flight set when dropped.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<TradeId>>>,
    id: TradeId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

struct Shared {
    manager: Arc<TradeLifecycleManager>,
    materiality_pct: f64,
    in_flight: Arc<Mutex<HashSet<TradeId>>>,
    /// P&L % at the last notification, per trade.
    last_notified: Mutex<HashMap<TradeId, f64>>,
    tx: broadcast::Sender<Notification>,
}

impl Shared {
    fn claim(&self, id: &str) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: self.in_flight.clone(),
            id: id.to_string(),
        })
    }

    /// Drop materiality baselines of trades closed outside the monitor.
    fn forget_inactive(&self, active: &[TradeRecord]) {
        let ids: HashSet<&str> = active.iter().map(|r| r.id()).collect();
        let mut last_notified = self.last_notified.lock().unwrap_or_else(|e| e.into_inner());
        last_notified.retain(|id, _| ids.contains(id.as_str()));
    }

    async fn check(&self, signal: TradeSignal) -> Result<CheckOutcome> {
        let Some(_guard) = self.claim(&signal.id) else {
            debug!("{} already in flight, skipping", signal.id);
            return Ok(CheckOutcome::Skipped);
        };

        let transition = self.manager.advance(&signal.id).await?;
        let notifications = self.notify(&signal, &transition);
        Ok(CheckOutcome::Checked {
            transition,
            notifications,
        })
    }

    fn notify(&self, signal: &TradeSignal, t: &Transition) -> usize {
        let current_pct = t.pnl.map(|p| p.net_percent).or_else(|| {
            t.last_price.map(|p| {
                self.manager
                    .pnl_calculator()
                    .mark_to_market_pct(signal, p.price)
            })
        });

        let mut out: Vec<Notification> = t
            .new_hits
            .iter()
            .map(|(target, hit)| Notification {
                kind: NotificationKind::TargetHit,
                trade_id: t.trade_id.clone(),
                symbol: t.symbol.clone(),
                target: Some(*target),
                price: hit.price,
                at: hit.at,
                pnl_percent: current_pct,
                status: t.to,
            })
            .collect();

        let mut last_notified = self.last_notified.lock().unwrap_or_else(|e| e.into_inner());
        let baseline = last_notified.get(&t.trade_id).copied().unwrap_or(0.0);

        if let (Some(pct), Some(last)) = (current_pct, t.last_price) {
            if out.is_empty() && (pct - baseline).abs() >= self.materiality_pct {
                out.push(Notification {
                    kind: NotificationKind::SignificantPnlChange,
                    trade_id: t.trade_id.clone(),
                    symbol: t.symbol.clone(),
                    target: None,
                    price: last.price,
                    at: last.at,
                    pnl_percent: Some(pct),
                    status: t.to,
                });
            }
            if !out.is_empty() {
                last_notified.insert(t.trade_id.clone(), pct);
            }
        }
        if t.is_terminal() {
            last_notified.remove(&t.trade_id);
        }
        drop(last_notified);

        for n in &out {
            match n.kind {
                NotificationKind::TargetHit => info!(
                    "[{}] {} {} hit @ {:.4}",
                    n.symbol,
                    n.trade_id,
                    n.target.map(|t| t.as_str()).unwrap_or("?"),
                    n.price
                ),
                NotificationKind::SignificantPnlChange => info!(
                    "[{}] {} P&L moved to {:+.2}%",
                    n.symbol,
                    n.trade_id,
                    n.pnl_percent.unwrap_or_default()
                ),
            }
            // No subscribers is fine
            let _ = self.tx.send(n.clone());
        }
        out.len()
    }
}

/// Periodically advances every active trade and publishes target hits and
/// material P&L moves.
pub struct RealTimeMonitor {
    shared: Arc<Shared>,
    interval: Duration,
    max_concurrent: usize,
}

impl RealTimeMonitor {
    pub fn new(manager: Arc<TradeLifecycleManager>, cfg: &Config) -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            shared: Arc::new(Shared {
                manager,
                materiality_pct: cfg.materiality_threshold_pct,
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                last_notified: Mutex::new(HashMap::new()),
                tx,
            }),
            interval: Duration::from_secs(cfg.monitor_interval_secs.max(1)),
            max_concurrent: cfg.max_concurrent_evaluations.max(1),
        }
    }

    /// Snapshot the settings from a config shared with the rest of the process.
    pub async fn from_shared(manager: Arc<TradeLifecycleManager>, config: &SharedConfig) -> Self {
        let cfg = config.read().await;
        Self::new(manager, &cfg)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.tx.subscribe()
    }

    /// One pass over all active trades. Per-trade failures are collected, not raised.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let active = self
            .shared
            .manager
            .store()
            .list(&TradeScope::all().with_status(TradeStatus::Active))
            .await?;

        self.shared.forget_inactive(&active);

        let mut report = SweepReport {
            active: active.len(),
            ..SweepReport::default()
        };

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for record in active {
            let shared = self.shared.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let signal = record.signal;
                let id = signal.id.clone();
                let symbol = signal.symbol.clone();
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => shared.check(signal).await,
                    Err(_) => Ok(CheckOutcome::Skipped),
                };
                (id, symbol, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (id, symbol, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    error!("Monitor task failed: {}", e);
                    continue;
                }
            };
            match outcome {
                Ok(CheckOutcome::Skipped) => report.skipped += 1,
                Ok(CheckOutcome::Checked {
                    transition,
                    notifications,
                }) => {
                    report.checked += 1;
                    report.notifications += notifications;
                    if transition.changed {
                        report.updated += 1;
                    }
                    if transition.is_terminal() {
                        report.closed += 1;
                    }
                }
                Err(e) => {
                    report.checked += 1;
                    if e.is_transient() {
                        warn!("{} {}: {} (retrying next sweep)", id, symbol, e);
                    } else {
                        error!("{} {}: {}", id, symbol, e);
                    }
                    report.errors.push(TradeError {
                        trade_id: id,
                        symbol,
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Sweep: {} active, {} checked, {} updated, {} closed, {} notifications, {} errors",
            report.active,
            report.checked,
            report.updated,
            report.closed,
            report.notifications,
            report.errors.len()
        );
        Ok(report)
    }

    /// Sweep on a fixed interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Monitor running every {}s (max {} concurrent)",
            self.interval.as_secs(),
            self.max_concurrent
        );
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.sweep().await {
                        Ok(r) if r.active > 0 => info!(
                            "Swept {} active trades: {} updated, {} closed, {} notifications, {} errors",
                            r.active, r.updated, r.closed, r.notifications, r.errors.len()
                        ),
                        Ok(_) => {}
                        Err(e) => error!("Sweep failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Monitor stopping");
                        return;
                    }
                }
            }
        }
    }
}
