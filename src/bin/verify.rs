use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use signal_verifier::analytics::{self, PatternAnalyzer, PerformanceAggregator};
use signal_verifier::clock::SystemClock;
use signal_verifier::config::Config;
use signal_verifier::prices;
use signal_verifier::trading::signal::load_requests;
use signal_verifier::trading::{JsonFileStore, TradeLifecycleManager, TradeScope};

/// verify [SYMBOL|STATUS|TIMEFRAME|all]... [SIGNALS_JSON]
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

    let mut scope = TradeScope::all();
    let mut signals_file = None;
    for arg in std::env::args().skip(1) {
        if arg.ends_with(".json") {
            signals_file = Some(arg);
        } else {
            scope = scope.with_term(&arg);
        }
    }

    let store = Arc::new(
        JsonFileStore::open(&cfg.store_path)
            .with_context(|| format!("Failed to open store {}", cfg.store_path))?,
    );
    let provider = prices::from_config(&cfg)?;
    let manager = TradeLifecycleManager::from_config(
        &cfg,
        store.clone(),
        provider,
        Arc::new(SystemClock),
    );

    if let Some(path) = &signals_file {
        let requests = load_requests(Path::new(path))
            .with_context(|| format!("Failed to read signals from {}", path))?;
        let total = requests.len();
        let registered = manager.import(requests).await;
        println!("Registered {}/{} signals from {}", registered, total, path);
    }

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║          SIGNAL VERIFIER                                 ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!(
        "║  Symbol:     {:<44}║",
        scope.symbol.as_deref().unwrap_or("all symbols")
    );
    if let Some(status) = scope.status {
        println!("║  Status:     {:<44}║", status.as_str());
    }
    if let Some(tf) = scope.timeframe {
        println!("║  Timeframe:  {:<44}║", tf.as_str());
    }
    println!("║  Provider:   {:<44}║", cfg.provider);
    println!("║  Notional:   ${:<43.2}║", cfg.notional_usd);
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    let summary = manager.verify_all(&scope).await?;
    println!(
        "Verified {} trades: {} updated, {} errors",
        summary.verified,
        summary.updated,
        summary.errors.len()
    );
    for e in &summary.errors {
        println!("  {} {}: {}", e.trade_id, e.symbol, e.message);
    }

    let stats = analytics::performance(
        &*store,
        &scope,
        &PerformanceAggregator::new(cfg.notional_usd),
    )
    .await?;
    stats.print_summary();

    let patterns =
        analytics::patterns(&*store, &scope, &PatternAnalyzer::from_config(&cfg)).await?;
    patterns.print_summary();

    Ok(())
}
