//! Technical indicators over closes ordered oldest to newest.
//!
//! Every function returns `None` when there is not enough history for the
//! requested period.

mod macd;
mod rsi;

use ta::Next;
use ta::indicators::{Maximum, SimpleMovingAverage};

pub use macd::{Macd, macd, macd_with};
pub use rsi::rsi;

fn tail(prices: &[f64], period: usize) -> Option<&[f64]> {
    (period > 0 && prices.len() >= period).then(|| &prices[prices.len() - period..])
}

/// Mean of the last `period` closes.
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    let window = tail(prices, period)?;
    let mut sma = SimpleMovingAverage::new(period).ok()?;
    window.iter().map(|&p| sma.next(p)).last()
}

/// Highest of the last `period` closes.
pub fn highest(prices: &[f64], period: usize) -> Option<f64> {
    let window = tail(prices, period)?;
    let mut max = Maximum::new(period).ok()?;
    window.iter().map(|&p| max.next(p)).last()
}

/// EMA seeded with the SMA of the first `period` closes.
///
/// Element `i` of the result lines up with `prices[period - 1 + i]`.
pub fn ema(prices: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(prices.len() - period + 1);
    out.push(seed);
    for &p in &prices[period..] {
        let prev = out[out.len() - 1];
        out.push(prev + k * (p - prev));
    }
    Some(out)
}

/// Sum of the last `period` close-to-close changes.
pub fn momentum(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() <= period {
        return None;
    }
    Some(
        prices[prices.len() - period - 1..]
            .windows(2)
            .map(|w| w[1] - w[0])
            .sum(),
    )
}
