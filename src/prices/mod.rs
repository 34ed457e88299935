pub mod coinbase;
pub mod historical;

pub use coinbase::CoinbaseClient;
pub use historical::HistoricalPrices;

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::models::PriceSeries;

/// Source of historical prices. An empty series is a valid answer; data is never invented.
#[async_trait]
pub trait PriceHistoryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Samples for `symbol` with `from <= timestamp <= to`, oldest first.
    async fn get_prices(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PriceSeries>;
}

/// Build the provider named in the config.
pub fn from_config(cfg: &Config) -> AnyResult<Arc<dyn PriceHistoryProvider>> {
    match cfg.provider.as_str() {
        "coinbase" => Ok(Arc::new(CoinbaseClient::new(cfg))),
        "file" => Ok(Arc::new(HistoricalPrices::from_dir(&cfg.price_data_dir)?)),
        other => bail!("Unknown price provider: {}", other),
    }
}
