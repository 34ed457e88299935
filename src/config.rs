use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::trading::lifecycle::ExpiryPolicy;
use crate::trading::pnl::DEFAULT_NOTIONAL_USD;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Price provider
    pub provider: String,
    pub coinbase_api_key: String,
    pub coinbase_api_secret: String,
    /// Directory of `<SYMBOL>.json` sample files for the "file" provider
    pub price_data_dir: String,

    // Persistence
    pub store_path: String,

    // Evaluation
    pub notional_usd: f64,
    pub expiry_policy: ExpiryPolicy,

    // Real-time monitor
    pub monitor_interval_secs: u64,
    /// Percentage points of P&L movement that trigger a re-notification
    pub materiality_threshold_pct: f64,
    pub max_concurrent_evaluations: usize,

    // Pattern analysis
    pub pattern_significance: f64,
    pub pattern_min_expected: f64,
    pub pattern_min_occurrences: usize,
    pub pattern_top_n: usize,

    // Logging
    pub log_dir: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let expiry_policy = match env("EXPIRY_POLICY", "by_pnl").to_lowercase().as_str() {
            "mark_expired" | "expired" => ExpiryPolicy::MarkExpired,
            _ => ExpiryPolicy::ByPnl,
        };

        Config {
            provider: env("PRICE_PROVIDER", "coinbase").to_lowercase(),
            coinbase_api_key: env("COINBASE_API_KEY", ""),
            coinbase_api_secret: env("COINBASE_API_SECRET", "").replace("\\n", "\n"),
            price_data_dir: env("PRICE_DATA_DIR", "data/prices"),
            store_path: env("STORE_PATH", "data/trades.json"),
            notional_usd: env("NOTIONAL_USD", "1000")
                .parse()
                .unwrap_or(DEFAULT_NOTIONAL_USD),
            expiry_policy,
            monitor_interval_secs: env("MONITOR_INTERVAL_SECS", "30").parse().unwrap_or(30),
            materiality_threshold_pct: env("MATERIALITY_THRESHOLD_PCT", "5")
                .parse()
                .unwrap_or(5.0),
            max_concurrent_evaluations: env("MAX_CONCURRENT_EVALUATIONS", "8")
                .parse()
                .unwrap_or(8),
            pattern_significance: env("PATTERN_SIGNIFICANCE", "0.05").parse().unwrap_or(0.05),
            pattern_min_expected: env("PATTERN_MIN_EXPECTED", "5").parse().unwrap_or(5.0),
            pattern_min_occurrences: env("PATTERN_MIN_OCCURRENCES", "5").parse().unwrap_or(5),
            pattern_top_n: env("PATTERN_TOP_N", "10").parse().unwrap_or(10),
            log_dir: env("LOG_DIR", "logs"),
            log_level: env("LOG_LEVEL", "INFO"),
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
