// Engine library root: ATR calculation over pluggable candle sources.

pub mod config;
pub mod data;
pub mod error;
pub mod indicators;

pub use data::{CandleBatch, CandleSource, CsvCandleParser, MarketDataStore};
pub use error::EngineError;
pub use indicators::{AtrCalculator, AtrReading};
