use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::info;

use crate::models::{PriceSample, PriceSeries};
use crate::prices::PriceHistoryProvider;

/// Replays pre-loaded samples per symbol. Only samples inside the requested
/// window are returned, so a growing dataset simulates a forward walk.
#[derive(Default)]
pub struct HistoricalPrices {
    data: RwLock<HashMap<String, PriceSeries>>,
}

impl HistoricalPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<SYMBOL>.json` file (a JSON array of samples) in `dir`.
    pub fn from_dir(dir: &str) -> Result<Self> {
        let prices = Self::new();
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("Failed to read price dir {}", dir))?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let symbol = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_uppercase(),
                None => continue,
            };
            let samples = read_samples(&path)?;
            info!("Loaded {} samples for {} from {}", samples.len(), symbol, path.display());
            prices.load(&symbol, samples);
        }
        Ok(prices)
    }

    /// Replace the samples for `symbol`.
    pub fn load(&self, symbol: &str, samples: Vec<PriceSample>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(symbol.to_uppercase(), PriceSeries::new(samples));
    }

    /// Add samples to whatever is already loaded for `symbol`.
    pub fn append(&self, symbol: &str, samples: Vec<PriceSample>) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let series = data.entry(symbol.to_uppercase()).or_default();
        for sample in samples {
            series.push(sample);
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        let mut symbols: Vec<String> = data.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn visible(&self, symbol: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> PriceSeries {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(&symbol.to_uppercase())
            .map(|s| s.within(from, to))
            .unwrap_or_default()
    }
}

fn read_samples(path: &Path) -> Result<Vec<PriceSample>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).with_context(|| format!("Bad price file {}", path.display()))
}

#[async_trait]
impl PriceHistoryProvider for HistoricalPrices {
    fn name(&self) -> &str {
        "historical"
    }

    async fn get_prices(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::error::Result<PriceSeries> {
        Ok(self.visible(symbol, from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{base_time, make_ticks};
    use chrono::Duration;

    #[tokio::test]
    async fn returns_only_the_requested_window() {
        let prices = HistoricalPrices::new();
        prices.load("btc", make_ticks(&[1.0, 2.0, 3.0, 4.0]).into_iter().collect());
        let t = base_time();
        let got = prices
            .get_prices("BTC", t + Duration::minutes(1), t + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[tokio::test]
    async fn unknown_symbol_is_empty_not_an_error() {
        let prices = HistoricalPrices::new();
        let t = base_time();
        let got = prices
            .get_prices("DOGE", t, t + Duration::hours(1))
            .await
            .unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn append_extends_series() {
        let prices = HistoricalPrices::new();
        prices.load("ETH", make_ticks(&[1.0, 2.0]).into_iter().collect());
        prices.append(
            "ETH",
            vec![PriceSample::tick(base_time() + Duration::minutes(5), 3.0)],
        );
        assert_eq!(prices.visible("ETH", base_time(), base_time() + Duration::hours(1)).len(), 3);
        assert_eq!(prices.symbols(), vec!["ETH".to_string()]);
    }

    #[test]
    fn from_dir_reads_symbol_files() {
        let dir = std::env::temp_dir().join(format!("signal_prices_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let samples: Vec<PriceSample> = make_ticks(&[10.0, 11.0]).into_iter().collect();
        std::fs::write(dir.join("sol.json"), serde_json::to_string(&samples).unwrap()).unwrap();

        let prices = HistoricalPrices::from_dir(dir.to_str().unwrap()).unwrap();
        assert_eq!(prices.symbols(), vec!["SOL".to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
