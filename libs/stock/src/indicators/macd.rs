use serde::{Deserialize, Serialize};

use super::ema;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(12, 26, 9). Needs at least 35 closes.
pub fn macd(prices: &[f64]) -> Option<Macd> {
    macd_with(prices, 12, 26, 9)
}

/// The fast EMA is cut down to the tail the slow EMA covers, so both
/// sequences end on the latest close.
pub fn macd_with(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if prices.len() < slow + signal {
        return None;
    }

    let fast_ema = ema(prices, fast)?;
    let slow_ema = ema(prices, slow)?;
    let fast_tail = &fast_ema[fast_ema.len().checked_sub(slow_ema.len())?..];

    let line: Vec<f64> = fast_tail
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal)?;

    let macd = *line.last()?;
    let signal = *signal_line.last()?;
    Some(Macd {
        macd,
        signal,
        histogram: macd - signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn undefined_below_35_points() {
        assert_eq!(macd(&ramp(34)), None);
        assert_eq!(macd(&ramp(0)), None);
        assert!(macd(&ramp(35)).is_some());
        assert!(macd(&ramp(200)).is_some());
    }

    #[test]
    fn flat_prices_give_zero_everywhere() {
        let m = macd(&vec![50.0; 60]).unwrap();

        assert!(m.macd.abs() < 1e-9);
        assert!(m.signal.abs() < 1e-9);
        assert!(m.histogram.abs() < 1e-9);
    }

    #[test]
    fn uptrend_puts_macd_above_zero() {
        let m = macd(&ramp(80)).unwrap();

        assert!(m.macd > 0.0);
        assert!((m.histogram - (m.macd - m.signal)).abs() < 1e-12);
    }
}
