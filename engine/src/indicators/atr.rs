//! Average True Range over a window of candles pulled from a [`CandleSource`].
//!
//! The calculator caches the last accepted window and only replaces it when
//! the source reports newer data or a different instrument is requested.
//! Smoothing is a simple moving average of `period` true range samples.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::models::{Candle, Granularity};

use super::true_range::true_range_series;
use crate::data::CandleSource;
use crate::error::EngineError;

pub const DEFAULT_PERIOD: usize = 14;

/// Cached candle window plus the cursor that decides when it goes stale.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    /// Empty, or exactly `period + 1` candles, oldest first.
    pub candles: Vec<Candle>,
    pub last_update_time: DateTime<Utc>,
    /// `None` until the first accepted refresh.
    pub last_instrument: Option<String>,
}

impl Default for WindowState {
    fn default() -> Self {
        WindowState {
            candles: Vec::new(),
            last_update_time: DateTime::<Utc>::UNIX_EPOCH,
            last_instrument: None,
        }
    }
}

/// Whether a fetched batch should replace the cached window.
pub fn needs_refresh(
    new_timestamp: DateTime<Utc>,
    new_instrument: &str,
    old_timestamp: DateTime<Utc>,
    old_instrument: Option<&str>,
) -> bool {
    new_timestamp > old_timestamp || old_instrument != Some(new_instrument)
}

/// A period must be positive and leave room for the `period + 2` candle fetch.
pub fn check_period(period: usize) -> Result<(), EngineError> {
    if period == 0 {
        return Err(EngineError::ConfigError(
            "ATR period must be greater than 0".to_string(),
        ));
    }
    if period.checked_add(2).is_none() {
        return Err(EngineError::ConfigError(format!(
            "ATR period {} is too large",
            period
        )));
    }
    Ok(())
}

/// Snapshot of the most recent successful calculation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtrReading {
    pub instrument: String,
    pub granularity: Granularity,
    pub period: usize,
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

/// Stateful ATR calculator bound to one candle source.
///
/// `calculate` takes `&mut self`: a single instance serves one caller at a
/// time. Wrap it in a lock, or keep one instance per caller, to share it.
///
/// The source must return candles oldest first; the window is sliced from
/// the tail of the batch without re-sorting.
pub struct AtrCalculator<S> {
    source: S,
    period: usize,
    state: WindowState,
    true_ranges: Vec<f64>,
    last_reading: Option<AtrReading>,
}

impl<S: CandleSource> AtrCalculator<S> {
    pub fn new(source: S) -> Self {
        Self::build(source, DEFAULT_PERIOD)
    }

    pub fn with_period(source: S, period: usize) -> Result<Self, EngineError> {
        check_period(period)?;
        Ok(Self::build(source, period))
    }

    fn build(source: S, period: usize) -> Self {
        AtrCalculator {
            source,
            period,
            state: WindowState::default(),
            true_ranges: Vec::new(),
            last_reading: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn window(&self) -> &[Candle] {
        &self.state.candles
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn last_instrument(&self) -> Option<&str> {
        self.state.last_instrument.as_deref()
    }

    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.state.last_update_time
    }

    /// True range samples from the latest call, oldest first.
    pub fn true_ranges(&self) -> &[f64] {
        &self.true_ranges
    }

    pub fn reading(&self) -> Option<&AtrReading> {
        self.last_reading.as_ref()
    }

    /// Computes the ATR for `instrument` at `granularity`.
    ///
    /// Issues exactly one fetch. Errors from the source are returned as-is;
    /// a window shorter than `period + 1` yields
    /// [`EngineError::InsufficientCandles`]. The cached window is left
    /// untouched on any error.
    pub fn calculate(
        &mut self,
        instrument: &str,
        granularity: Granularity,
    ) -> Result<f64, EngineError> {
        self.true_ranges.clear();
        self.refresh(instrument, granularity)?;

        let required = self.period + 1;
        let received = self.state.candles.len();
        if received < required {
            tracing::warn!(
                instrument,
                %granularity,
                received,
                required,
                "Cached candle window too short for ATR"
            );
            return Err(EngineError::InsufficientCandles { received, required });
        }

        self.true_ranges = true_range_series(&self.state.candles);
        debug_assert_eq!(self.true_ranges.len(), self.period);

        // Divided by the configured period, which equals the sample count
        // only because the window holds exactly period + 1 candles.
        let value = self.true_ranges.iter().sum::<f64>() / self.period as f64;

        tracing::info!(
            instrument,
            %granularity,
            period = self.period,
            atr = value,
            "Calculated ATR"
        );
        self.last_reading = Some(AtrReading {
            instrument: instrument.to_string(),
            granularity,
            period: self.period,
            value,
            updated_at: self.state.last_update_time,
        });
        Ok(value)
    }

    /// Same as [`calculate`](Self::calculate) on daily candles.
    pub fn calculate_daily(&mut self, instrument: &str) -> Result<f64, EngineError> {
        self.calculate(instrument, Granularity::default())
    }

    fn refresh(&mut self, instrument: &str, granularity: Granularity) -> Result<(), EngineError> {
        let batch = self
            .source
            .fetch_candles(instrument, self.period + 2, granularity)?;

        if !needs_refresh(
            batch.updated_at,
            instrument,
            self.state.last_update_time,
            self.last_instrument(),
        ) {
            tracing::debug!(
                instrument,
                %granularity,
                updated_at = %batch.updated_at,
                "Candle data unchanged, keeping cached window"
            );
            return Ok(());
        }

        let required = self.period + 1;
        let received = batch.candles.len();
        if received < required {
            tracing::warn!(
                instrument,
                %granularity,
                received,
                required,
                "Candle source returned too few candles for ATR"
            );
            return Err(EngineError::InsufficientCandles { received, required });
        }

        let mut candles = batch.candles;
        candles.drain(..received - required);
        tracing::debug!(
            instrument,
            %granularity,
            updated_at = %batch.updated_at,
            "Accepted refreshed candle window"
        );

        self.state = WindowState {
            candles,
            last_update_time: batch.updated_at,
            last_instrument: Some(instrument.to_string()),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CandleBatch, MarketDataStore};
    use chrono::{Duration, TimeZone};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    // Replays canned replies in order and records every request.
    struct ScriptedSource {
        replies: RefCell<VecDeque<Result<CandleBatch, EngineError>>>,
        requests: RefCell<Vec<(String, usize, Granularity)>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<CandleBatch, EngineError>>) -> Self {
            ScriptedSource {
                replies: RefCell::new(replies.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn fetches(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl CandleSource for ScriptedSource {
        fn fetch_candles(
            &self,
            instrument: &str,
            count: usize,
            granularity: Granularity,
        ) -> Result<CandleBatch, EngineError> {
            self.requests
                .borrow_mut()
                .push((instrument.to_string(), count, granularity));
            self.replies.borrow_mut().pop_front().unwrap_or_else(|| {
                Err(EngineError::MarketDataError("script exhausted".to_string()))
            })
        }
    }

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn create_candle(n: i64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "TEST".to_string(),
            timestamp: day(n),
            open: close,
            high,
            low,
            close,
            volume: 0.0,
            trades: 0,
        }
    }

    // close rises by one each day from `start`, with a +/-1 range around it.
    fn trending_batch(count: usize, start: f64) -> CandleBatch {
        let candles: Vec<Candle> = (0..count)
            .map(|i| {
                let curr = start + i as f64;
                create_candle(i as i64, curr + 1.0, curr - 1.0, curr)
            })
            .collect();
        CandleBatch { updated_at: day(count as i64 - 1), candles }
    }

    fn flat_batch(count: usize, price: f64) -> CandleBatch {
        let candles = (0..count)
            .map(|i| create_candle(i as i64, price, price, price))
            .collect();
        CandleBatch { updated_at: day(count as i64 - 1), candles }
    }

    fn with_timestamp(mut batch: CandleBatch, updated_at: DateTime<Utc>) -> CandleBatch {
        batch.updated_at = updated_at;
        batch
    }

    #[test]
    fn test_trending_series_has_atr_of_two() {
        let source = ScriptedSource::new(vec![Ok(trending_batch(16, 100.0))]);
        let mut atr = AtrCalculator::new(source);

        let value = atr.calculate("EUR_USD", Granularity::D).unwrap();

        assert_eq!(value, 2.0);
        assert_eq!(atr.true_ranges(), &[2.0; 14][..]);
        assert_eq!(atr.window().len(), 15);
        // The oldest of the 16 candles is sliced off.
        assert_eq!(atr.window()[0].close, 101.0);
        assert_eq!(
            atr.source().requests.borrow()[0],
            ("EUR_USD".to_string(), 16, Granularity::D)
        );
    }

    #[test]
    fn test_flat_series_has_zero_atr() {
        let source = ScriptedSource::new(vec![Ok(flat_batch(16, 42.0))]);
        let mut atr = AtrCalculator::new(source);
        assert_eq!(atr.calculate_daily("FLAT").unwrap(), 0.0);
    }

    #[test]
    fn test_result_is_mean_of_true_ranges() {
        let mut batch = trending_batch(6, 10.0);
        // Gap on the last candle: TR = |20 - 14| = 6 instead of 2.
        batch.candles[5] = create_candle(5, 20.0, 19.0, 19.5);
        let source = ScriptedSource::new(vec![Ok(batch)]);
        let mut atr = AtrCalculator::with_period(source, 4).unwrap();

        let value = atr.calculate("X", Granularity::H1).unwrap();

        assert_eq!(atr.true_ranges(), &[2.0, 2.0, 2.0, 6.0][..]);
        assert_eq!(value, 12.0 / 4.0);
        assert_eq!(atr.source().requests.borrow()[0].1, 6);
    }

    #[test]
    fn test_unchanged_timestamp_keeps_window() {
        let first = trending_batch(16, 100.0);
        let stamp = first.updated_at;
        // Same freshness marker, different contents: must be ignored.
        let second = with_timestamp(trending_batch(16, 500.0), stamp);
        let source = ScriptedSource::new(vec![Ok(first), Ok(second)]);
        let mut atr = AtrCalculator::new(source);

        let a = atr.calculate("EUR_USD", Granularity::D).unwrap();
        let window_after_first = atr.window().to_vec();
        let b = atr.calculate("EUR_USD", Granularity::D).unwrap();

        assert_eq!(a, b);
        assert_eq!(atr.window(), &window_after_first[..]);
        assert_eq!(atr.true_ranges().len(), 14);
        assert_eq!(atr.source().fetches(), 2);
    }

    #[test]
    fn test_newer_timestamp_replaces_window() {
        let first = trending_batch(16, 100.0);
        let second = with_timestamp(flat_batch(16, 7.0), first.updated_at + Duration::days(1));
        let newer = second.updated_at;
        let source = ScriptedSource::new(vec![Ok(first), Ok(second)]);
        let mut atr = AtrCalculator::new(source);

        assert_eq!(atr.calculate("EUR_USD", Granularity::D).unwrap(), 2.0);
        assert_eq!(atr.calculate("EUR_USD", Granularity::D).unwrap(), 0.0);
        assert_eq!(atr.last_update_time(), newer);
    }

    #[test]
    fn test_instrument_switch_forces_refresh() {
        let first = trending_batch(16, 100.0);
        let second = with_timestamp(flat_batch(16, 7.0), first.updated_at);
        let source = ScriptedSource::new(vec![Ok(first), Ok(second)]);
        let mut atr = AtrCalculator::new(source);

        atr.calculate("EUR_USD", Granularity::D).unwrap();
        assert_eq!(atr.last_instrument(), Some("EUR_USD"));

        let value = atr.calculate("USD_JPY", Granularity::D).unwrap();
        assert_eq!(value, 0.0);
        assert_eq!(atr.last_instrument(), Some("USD_JPY"));
        assert_eq!(atr.window()[0].close, 7.0);
    }

    #[test]
    fn test_thin_data_reports_received_count() {
        let source = ScriptedSource::new(vec![Ok(trending_batch(5, 100.0))]);
        let mut atr = AtrCalculator::new(source);

        let err = atr.calculate("EUR_USD", Granularity::D).unwrap_err();

        assert!(matches!(err, EngineError::InsufficientCandles { received: 5, required: 15 }));
        assert_eq!(atr.state(), &WindowState::default());
        assert!(atr.true_ranges().is_empty());
        assert!(atr.reading().is_none());
    }

    #[test]
    fn test_thin_refresh_leaves_previous_window() {
        let first = trending_batch(16, 100.0);
        let stamp = first.updated_at;
        let thin = with_timestamp(flat_batch(3, 1.0), stamp + Duration::days(1));
        let source = ScriptedSource::new(vec![Ok(first), Ok(thin)]);
        let mut atr = AtrCalculator::new(source);

        atr.calculate("EUR_USD", Granularity::D).unwrap();
        let before = atr.state().clone();
        let err = atr.calculate("EUR_USD", Granularity::D).unwrap_err();

        assert!(err.is_insufficient_candles());
        assert_eq!(atr.state(), &before);
        assert_eq!(atr.last_update_time(), stamp);
        assert_eq!(atr.reading().map(|r| r.value), Some(2.0));
    }

    #[test]
    fn test_source_error_passes_through() {
        let source = ScriptedSource::new(vec![Err(EngineError::MarketDataError(
            "upstream 503".to_string(),
        ))]);
        let mut atr = AtrCalculator::new(source);

        let err = atr.calculate("EUR_USD", Granularity::D).unwrap_err();

        assert!(matches!(err, EngineError::MarketDataError(ref msg) if msg == "upstream 503"));
        assert_eq!(atr.state(), &WindowState::default());
    }

    #[test]
    fn test_zero_period_rejected() {
        let source = ScriptedSource::new(vec![]);
        assert!(matches!(
            AtrCalculator::with_period(source, 0),
            Err(EngineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_oversized_period_rejected() {
        let store = MarketDataStore::new();
        for period in [usize::MAX, usize::MAX - 1] {
            let err = AtrCalculator::with_period(&store, period).err();
            let msg = match err {
                Some(EngineError::ConfigError(msg)) => msg,
                other => panic!("period {} should be rejected, got {:?}", period, other),
            };
            assert!(msg.contains("too large"));
        }
    }

    #[test]
    fn test_largest_period_fetches_without_overflow() {
        let period = usize::MAX - 2;
        let source = ScriptedSource::new(vec![Ok(trending_batch(16, 100.0))]);
        let mut atr = AtrCalculator::with_period(source, period).unwrap();

        let err = atr.calculate("EUR_USD", Granularity::D).unwrap_err();

        match err {
            EngineError::InsufficientCandles { received, required } => {
                assert_eq!(received, 16);
                assert_eq!(required, usize::MAX - 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(atr.source().requests.borrow()[0].1, usize::MAX);
        assert_eq!(atr.state(), &WindowState::default());
    }

    #[test]
    fn test_reading_snapshot() {
        let batch = trending_batch(16, 100.0);
        let stamp = batch.updated_at;
        let mut atr = AtrCalculator::new(ScriptedSource::new(vec![Ok(batch)]));
        atr.calculate("EUR_USD", Granularity::H4).unwrap();

        let reading = atr.reading().unwrap();
        assert_eq!(reading.instrument, "EUR_USD");
        assert_eq!(reading.granularity, Granularity::H4);
        assert_eq!(reading.period, 14);
        assert_eq!(reading.value, 2.0);
        assert_eq!(reading.updated_at, stamp);

        let json = serde_json::to_value(reading).unwrap();
        assert_eq!(json["granularity"], "H4");
    }

    #[test]
    fn test_needs_refresh_predicate() {
        let t0 = day(0);
        let t1 = day(1);
        assert!(needs_refresh(t0, "A", DateTime::<Utc>::UNIX_EPOCH, None));
        assert!(needs_refresh(t0, "A", t0, None));
        assert!(needs_refresh(t1, "A", t0, Some("A")));
        assert!(needs_refresh(t0, "B", t0, Some("A")));
        assert!(needs_refresh(t0, "B", t1, Some("A")));
        assert!(!needs_refresh(t0, "A", t0, Some("A")));
        assert!(!needs_refresh(t0, "A", t1, Some("A")));
    }

    #[test]
    fn test_store_as_borrowed_source() {
        let mut store = MarketDataStore::new();
        store.add_candles("PETR4", Granularity::D, trending_batch(30, 20.0).candles);

        let mut atr = AtrCalculator::new(&store);
        assert_eq!(atr.calculate("PETR4", Granularity::D).unwrap(), 2.0);
        assert_eq!(atr.window().last().map(|c| c.close), Some(49.0));

        // Nothing new in the store: the cached window stays.
        assert_eq!(atr.calculate("PETR4", Granularity::D).unwrap(), 2.0);
        assert!(atr.calculate("VALE3", Granularity::D).is_err());
    }
}
