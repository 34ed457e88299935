use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price observation. Bars carry open/high/low; ticks only a close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
}

impl PriceSample {
    pub fn tick(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self {
            timestamp,
            open: None,
            high: None,
            low: None,
            close: price,
            volume: None,
        }
    }

    pub fn bar(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            timestamp,
            open: Some(open),
            high: Some(high),
            low: Some(low),
            close,
            volume: None,
        }
    }

    pub fn is_bar(&self) -> bool {
        self.high.is_some() && self.low.is_some()
    }

    /// Highest traded price in the sample (close for ticks).
    pub fn high_or_close(&self) -> f64 {
        self.high.unwrap_or(self.close).max(self.close)
    }

    /// Lowest traded price in the sample (close for ticks).
    pub fn low_or_close(&self) -> f64 {
        self.low.unwrap_or(self.close).min(self.close)
    }

    fn is_valid(&self) -> bool {
        self.close.is_finite()
            && self.close > 0.0
            && self.high.map_or(true, |h| h.is_finite())
            && self.low.map_or(true, |l| l.is_finite())
    }
}

/// Time-ordered, de-duplicated samples for one symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSeries {
    samples: Vec<PriceSample>,
}

impl PriceSeries {
    /// Sorts oldest-first, drops duplicate timestamps and unusable prices.
    pub fn new(mut samples: Vec<PriceSample>) -> Self {
        samples.retain(PriceSample::is_valid);
        samples.sort_by_key(|s| s.timestamp);
        samples.dedup_by_key(|s| s.timestamp);
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&PriceSample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&PriceSample> {
        self.samples.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PriceSample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[PriceSample] {
        &self.samples
    }

    /// Samples with `from <= timestamp <= to`.
    pub fn within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> PriceSeries {
        let start = self.samples.partition_point(|s| s.timestamp < from);
        let end = self.samples.partition_point(|s| s.timestamp <= to);
        if start >= end {
            return PriceSeries::default();
        }
        PriceSeries {
            samples: self.samples[start..end].to_vec(),
        }
    }

    /// Samples strictly after `ts`.
    pub fn after(&self, ts: DateTime<Utc>) -> PriceSeries {
        let start = self.samples.partition_point(|s| s.timestamp <= ts);
        PriceSeries {
            samples: self.samples[start..].to_vec(),
        }
    }

    /// Samples at or after `ts`.
    pub fn since(&self, ts: DateTime<Utc>) -> PriceSeries {
        let start = self.samples.partition_point(|s| s.timestamp < ts);
        PriceSeries {
            samples: self.samples[start..].to_vec(),
        }
    }

    /// Median spacing between consecutive samples, in seconds.
    pub fn median_spacing_secs(&self) -> Option<i64> {
        if self.samples.len() < 2 {
            return None;
        }
        let mut spacings: Vec<i64> = self
            .samples
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
            .collect();
        spacings.sort_unstable();
        Some(spacings[spacings.len() / 2])
    }

    /// Number of spacings wider than twice the median spacing.
    pub fn gap_count(&self) -> usize {
        let median = match self.median_spacing_secs() {
            Some(m) if m > 0 => m,
            _ => return 0,
        };
        self.samples
            .windows(2)
            .filter(|w| (w[1].timestamp - w[0].timestamp).num_seconds() > median * 2)
            .count()
    }

    pub fn push(&mut self, sample: PriceSample) {
        match self.samples.last() {
            Some(last) if sample.timestamp <= last.timestamp => {
                let mut all = std::mem::take(&mut self.samples);
                all.push(sample);
                *self = PriceSeries::new(all);
            }
            _ => {
                if sample.is_valid() {
                    self.samples.push(sample);
                }
            }
        }
    }
}

impl IntoIterator for PriceSeries {
    type Item = PriceSample;
    type IntoIter = std::vec::IntoIter<PriceSample>;
    fn into_iter(self) -> Self::IntoIter {
        self.samples.into_iter()
    }
}

impl FromIterator<PriceSample> for PriceSeries {
    fn from_iter<I: IntoIterator<Item = PriceSample>>(iter: I) -> Self {
        PriceSeries::new(iter.into_iter().collect())
    }
}
