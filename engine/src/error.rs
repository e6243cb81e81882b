use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("CSV parsing system error: {source}")]
    CsvSystemError {
        #[from]
        source: csv::Error,
    },

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    #[error("CSV data format error: {0}")]
    CsvDataFormatError(String),

    #[error("Market data store error: {0}")]
    MarketDataError(String),

    /// The candle window was too short to produce `period` true range samples.
    #[error("not enough candles to compute ATR: received {received}, requires {required}")]
    InsufficientCandles { received: usize, required: usize },
}

impl EngineError {
    pub fn is_insufficient_candles(&self) -> bool {
        matches!(self, EngineError::InsufficientCandles { .. })
    }
}
