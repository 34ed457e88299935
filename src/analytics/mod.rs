pub mod patterns;
pub mod performance;
pub mod report;
pub mod stats;

pub use patterns::{PatternAnalysis, PatternAnalyzer, PatternRecord};
pub use performance::{AdvancedMetrics, PerformanceAggregator, PerformanceStats};

use crate::error::Result;
use crate::trading::store::{TradeScope, TradeStore};

/// Performance over a snapshot of the trades in `scope`.
pub async fn performance(
    store: &dyn TradeStore,
    scope: &TradeScope,
    aggregator: &PerformanceAggregator,
) -> Result<PerformanceStats> {
    let records = store.list(scope).await?;
    Ok(aggregator.compute(&records))
}

/// Significant generation-time patterns over a snapshot of the trades in `scope`.
pub async fn patterns(
    store: &dyn TradeStore,
    scope: &TradeScope,
    analyzer: &PatternAnalyzer,
) -> Result<PatternAnalysis> {
    let records = store.list(scope).await?;
    Ok(analyzer.analyze(&records))
}
