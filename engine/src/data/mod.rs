// Market data: the candle source contract and the sources the engine ships with.
pub mod candle_source;
pub mod csv_parser;
pub mod market_data;

pub use candle_source::{CandleBatch, CandleSource};
pub use csv_parser::CsvCandleParser;
pub use market_data::MarketDataStore;
