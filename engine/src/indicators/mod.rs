// Technical indicators module
pub mod atr;
pub mod true_range;

pub use atr::{
    check_period, needs_refresh, AtrCalculator, AtrReading, WindowState, DEFAULT_PERIOD,
};
pub use true_range::{true_range, true_range_series};
