/// Wilder RSI over `period` deltas. Needs more than `period` closes.
///
/// Averages are seeded from the first `period` deltas and then smoothed with
/// `(avg * (period - 1) + x) / period`. A zero average loss reads as 100.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() <= period {
        return None;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = deltas.split_at(period);
    let n = period as f64;

    let mut avg_gain = seed.iter().map(|d| d.max(0.0)).sum::<f64>() / n;
    let mut avg_loss = seed.iter().map(|d| (-d).max(0.0)).sum::<f64>() / n;

    for d in rest {
        avg_gain = (avg_gain * (n - 1.0) + d.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-d).max(0.0)) / n;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
