use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use signal_verifier::clock::SystemClock;
use signal_verifier::config::Config;
use signal_verifier::monitor::{Notification, RealTimeMonitor};
use signal_verifier::prices;
use signal_verifier::trading::signal::load_requests;
use signal_verifier::trading::{JsonFileStore, TradeLifecycleManager};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    info!("{}", "=".repeat(60));
    info!("Signal monitor starting up");
    info!("Provider: {}", cfg.provider);
    info!("Store:    {}", cfg.store_path);
    info!(
        "Interval: {}s | materiality {:.1} pts | notional ${:.0}",
        cfg.monitor_interval_secs, cfg.materiality_threshold_pct, cfg.notional_usd
    );
    info!("{}", "=".repeat(60));

    let store = Arc::new(
        JsonFileStore::open(&cfg.store_path)
            .with_context(|| format!("Failed to open store {}", cfg.store_path))?,
    );
    let provider = prices::from_config(&cfg)?;
    let manager = Arc::new(TradeLifecycleManager::from_config(
        &cfg,
        store,
        provider,
        Arc::new(SystemClock),
    ));

    // Optional: a JSON array of signals to register before monitoring
    if let Some(path) = std::env::args().nth(1) {
        let requests = load_requests(Path::new(&path))
            .with_context(|| format!("Failed to read signals from {}", path))?;
        let total = requests.len();
        let registered = manager.import(requests).await;
        info!("Registered {}/{} signals from {}", registered, total, path);
    }

    let shared_config = cfg.clone().shared();
    let monitor = RealTimeMonitor::from_shared(manager, &shared_config).await;
    let journal = PathBuf::from(&cfg.log_dir).join("notifications.jsonl");
    let writer = tokio::spawn(journal_notifications(monitor.subscribe(), journal));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::select! {
        _ = monitor.run(shutdown_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    }

    drop(monitor);
    let _ = writer.await;
    info!("Signal monitor stopped");
    Ok(())
}

/// Append every notification as one JSON line under the log dir.
async fn journal_notifications(mut rx: broadcast::Receiver<Notification>, path: PathBuf) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Cannot create {}: {}", parent.display(), e);
            return;
        }
    }

    loop {
        match rx.recv().await {
            Ok(n) => {
                if let Err(e) = append_line(&path, &n) {
                    warn!("Failed to journal notification for {}: {}", n.trade_id, e);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Notification journal lagged, {} events dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn append_line(path: &Path, n: &Notification) -> Result<()> {
    let line = serde_json::to_string(n)?;
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(f, "{}", line)?;
    Ok(())
}
