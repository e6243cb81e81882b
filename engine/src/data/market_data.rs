// In-memory candle storage, usable directly as a CandleSource.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::models::{Candle, Granularity};

use super::candle_source::{CandleBatch, CandleSource};
use crate::error::EngineError;

pub struct MarketDataStore {
    // Each series is kept sorted by timestamp with no duplicate timestamps.
    data: HashMap<String, HashMap<Granularity, Vec<Candle>>>,
}

impl MarketDataStore {
    pub fn new() -> Self {
        MarketDataStore {
            data: HashMap::new(),
        }
    }

    /// Merges `new_candles` into the series. A candle whose timestamp is
    /// already stored replaces the stored one.
    pub fn add_candles(
        &mut self,
        symbol: &str,
        granularity: Granularity,
        new_candles: Vec<Candle>,
    ) -> usize {
        let series = self
            .data
            .entry(symbol.to_string())
            .or_default()
            .entry(granularity)
            .or_default();

        // Newer entries go first so that dedup keeps them.
        let mut merged = new_candles;
        merged.reverse();
        merged.append(series);
        merged.sort_by_key(|c| c.timestamp);
        merged.dedup_by_key(|c| c.timestamp);
        *series = merged;

        tracing::debug!(symbol, %granularity, total = series.len(), "Stored candles");
        series.len()
    }

    pub fn get_candles(
        &self,
        symbol: &str,
        granularity: Granularity,
        from_timestamp: Option<DateTime<Utc>>,
        to_timestamp: Option<DateTime<Utc>>,
    ) -> Option<Vec<Candle>> {
        self.series(symbol, granularity).map(|candles| {
            candles
                .iter()
                .filter(|c| from_timestamp.map_or(true, |start| c.timestamp >= start))
                .filter(|c| to_timestamp.map_or(true, |end| c.timestamp <= end))
                .cloned()
                .collect()
        })
    }

    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.data.keys().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    fn series(&self, symbol: &str, granularity: Granularity) -> Option<&Vec<Candle>> {
        self.data.get(symbol).and_then(|by_granularity| by_granularity.get(&granularity))
    }
}

impl Default for MarketDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleSource for MarketDataStore {
    fn fetch_candles(
        &self,
        instrument: &str,
        count: usize,
        granularity: Granularity,
    ) -> Result<CandleBatch, EngineError> {
        let series = self.series(instrument, granularity).ok_or_else(|| {
            EngineError::MarketDataError(format!(
                "Market data not found for symbol '{}' and granularity {}",
                instrument, granularity
            ))
        })?;

        let start = series.len().saturating_sub(count);
        let candles = series[start..].to_vec();
        let updated_at = candles
            .last()
            .map(|c| c.timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(CandleBatch { updated_at, candles })
    }
}
