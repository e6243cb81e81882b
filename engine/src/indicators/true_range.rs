// True Range: the widest of today's range and the gaps from yesterday's close.
use shared::models::Candle;

pub fn true_range(prev: &Candle, curr: &Candle) -> f64 {
    let high_low = curr.high - curr.low;
    let high_close = (curr.high - prev.close).abs();
    let low_close = (curr.low - prev.close).abs();
    high_low.max(high_close).max(low_close)
}

/// One value per consecutive pair, oldest first.
pub fn true_range_series(window: &[Candle]) -> Vec<f64> {
    window
        .windows(2)
        .map(|pair| true_range(&pair[0], &pair[1]))
        .collect()
}
