use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLC bar for a single time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown granularity code '{0}'")]
pub struct ParseGranularityError(pub String);

/// Candle timeframe, identified by the same short codes the broker APIs use
/// (`M1` is one minute, a bare `M` is one month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Granularity {
    S5,
    S10,
    S15,
    S30,
    M1,
    M2,
    M4,
    M5,
    M10,
    M15,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    #[default]
    D,
    W,
    M,
}

impl Granularity {
    pub const ALL: [Granularity; 21] = [
        Granularity::S5,
        Granularity::S10,
        Granularity::S15,
        Granularity::S30,
        Granularity::M1,
        Granularity::M2,
        Granularity::M4,
        Granularity::M5,
        Granularity::M10,
        Granularity::M15,
        Granularity::M30,
        Granularity::H1,
        Granularity::H2,
        Granularity::H3,
        Granularity::H4,
        Granularity::H6,
        Granularity::H8,
        Granularity::H12,
        Granularity::D,
        Granularity::W,
        Granularity::M,
    ];

    pub fn as_code(&self) -> &'static str {
        match self {
            Granularity::S5 => "S5",
            Granularity::S10 => "S10",
            Granularity::S15 => "S15",
            Granularity::S30 => "S30",
            Granularity::M1 => "M1",
            Granularity::M2 => "M2",
            Granularity::M4 => "M4",
            Granularity::M5 => "M5",
            Granularity::M10 => "M10",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H2 => "H2",
            Granularity::H3 => "H3",
            Granularity::H4 => "H4",
            Granularity::H6 => "H6",
            Granularity::H8 => "H8",
            Granularity::H12 => "H12",
            Granularity::D => "D",
            Granularity::W => "W",
            Granularity::M => "M",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

impl FromStr for Granularity {
    type Err = ParseGranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Granularity::ALL
            .iter()
            .copied()
            .find(|g| g.as_code() == code)
            .ok_or_else(|| ParseGranularityError(s.to_string()))
    }
}

impl TryFrom<String> for Granularity {
    type Error = ParseGranularityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(value: Granularity) -> Self {
        value.as_code().to_string()
    }
}
