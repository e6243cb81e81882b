use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::models::{Candle, Granularity};

use crate::error::EngineError;

/// Result of a single candle fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleBatch {
    /// Freshness marker for the returned data. Compared with strict `>`
    /// against the previous batch to decide whether anything changed.
    pub updated_at: DateTime<Utc>,
    /// Candles ordered oldest first.
    pub candles: Vec<Candle>,
}

/// Anything that can hand out recent candles for an instrument.
///
/// Implementations are expected to return at most `count` candles ordered
/// oldest to newest. Consumers do not re-sort, so ordering is part of the
/// contract. Transport concerns (retries, timeouts, auth) belong to the
/// implementation; errors it returns are passed through to callers as-is.
pub trait CandleSource {
    fn fetch_candles(
        &self,
        instrument: &str,
        count: usize,
        granularity: Granularity,
    ) -> Result<CandleBatch, EngineError>;
}

impl<S: CandleSource + ?Sized> CandleSource for &S {
    fn fetch_candles(
        &self,
        instrument: &str,
        count: usize,
        granularity: Granularity,
    ) -> Result<CandleBatch, EngineError> {
        (**self).fetch_candles(instrument, count, granularity)
    }
}

impl<S: CandleSource + ?Sized> CandleSource for Box<S> {
    fn fetch_candles(
        &self,
        instrument: &str,
        count: usize,
        granularity: Granularity,
    ) -> Result<CandleBatch, EngineError> {
        (**self).fetch_candles(instrument, count, granularity)
    }
}

impl<S: CandleSource + ?Sized> CandleSource for Arc<S> {
    fn fetch_candles(
        &self,
        instrument: &str,
        count: usize,
        granularity: Granularity,
    ) -> Result<CandleBatch, EngineError> {
        (**self).fetch_candles(instrument, count, granularity)
    }
}
