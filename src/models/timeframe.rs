use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signal timeframe. Each one maps to a fixed validity window after generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// How long a signal on this timeframe stays open before it expires.
    pub fn validity(&self) -> Duration {
        match self {
            Timeframe::M15 => Duration::hours(4),
            Timeframe::H1 => Duration::hours(24),
            Timeframe::H4 => Duration::days(3),
            Timeframe::D1 => Duration::days(7),
            Timeframe::W1 => Duration::days(30),
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Timeframe> {
        match s.trim().to_lowercase().as_str() {
            "15m" | "m15" => Some(Timeframe::M15),
            "1h" | "h1" => Some(Timeframe::H1),
            "4h" | "h4" => Some(Timeframe::H4),
            "1d" | "d1" => Some(Timeframe::D1),
            "1w" | "w1" => Some(Timeframe::W1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_grows_with_timeframe() {
        let durations: Vec<Duration> = Timeframe::ALL.iter().map(|tf| tf.validity()).collect();
        assert!(durations.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn parses_loose_names() {
        assert_eq!(Timeframe::from_str_loose("4H"), Some(Timeframe::H4));
        assert_eq!(Timeframe::from_str_loose(" 1w "), Some(Timeframe::W1));
        assert_eq!(Timeframe::from_str_loose("3m"), None);
    }

    #[test]
    fn serde_uses_short_names() {
        let json = serde_json::to_string(&Timeframe::D1).unwrap();
        assert_eq!(json, "\"1d\"");
    }
}
