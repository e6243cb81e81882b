// Data models shared between the engine and any consumer of its output.
pub mod models;

pub use models::{Candle, Granularity, ParseGranularityError};
