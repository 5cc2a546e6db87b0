use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::indicators::{highest, macd, momentum, rsi, sma};

/// Fewest closes a symbol needs before it is scored at all.
pub const MIN_HISTORY: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub last: f64,
    pub sma20: f64,
    pub sma60: f64,
    pub rsi14: f64,
    pub macd: f64,
    pub signal: f64,
    pub hi20: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    #[serde(rename = "instrument")]
    pub symbol: String,
    pub score: u8,
    pub metrics: Metrics,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Uptrend,
    MacdBullish,
    RsiBand,
    NearHigh,
    Momentum,
}

impl Criterion {
    pub const ALL: [Criterion; 5] = [
        Criterion::Uptrend,
        Criterion::MacdBullish,
        Criterion::RsiBand,
        Criterion::NearHigh,
        Criterion::Momentum,
    ];

    pub fn weight(self) -> u8 {
        match self {
            Criterion::Uptrend => 30,
            Criterion::MacdBullish => 25,
            Criterion::RsiBand => 20,
            Criterion::NearHigh => 15,
            Criterion::Momentum => 10,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Criterion::Uptrend => "uptrend",
            Criterion::MacdBullish => "MACD bullish",
            Criterion::RsiBand => "neutral-to-strong RSI",
            Criterion::NearHigh => "near/at 20-period high",
            Criterion::Momentum => "positive short-term momentum",
        }
    }

    pub fn holds(self, m: &Metrics, momentum5: f64) -> bool {
        match self {
            Criterion::Uptrend => m.last > m.sma20 && m.sma20 > m.sma60,
            Criterion::MacdBullish => m.macd > m.signal,
            Criterion::RsiBand => (50.0..=70.0).contains(&m.rsi14),
            Criterion::NearHigh => m.last >= 0.995 * m.hi20,
            Criterion::Momentum => momentum5 > 0.0,
        }
    }
}

/// Scores closes ordered oldest to newest.
///
/// Fails with `InsufficientHistory` below `MIN_HISTORY` closes.
pub fn evaluate(symbol: &str, prices: &[f64]) -> Result<ScoreResult> {
    let short = || Error::InsufficientHistory {
        have: prices.len(),
        need: MIN_HISTORY,
    };
    if prices.len() < MIN_HISTORY {
        return Err(short());
    }

    let m = macd(prices).ok_or_else(short)?;
    let metrics = Metrics {
        last: *prices.last().ok_or_else(short)?,
        sma20: sma(prices, 20).ok_or_else(short)?,
        sma60: sma(prices, 60).ok_or_else(short)?,
        rsi14: rsi(prices, 14).ok_or_else(short)?,
        macd: m.macd,
        signal: m.signal,
        hi20: highest(prices, 20).ok_or_else(short)?,
    };
    let momentum5 = momentum(prices, 5).ok_or_else(short)?;

    let hits: Vec<Criterion> = Criterion::ALL
        .into_iter()
        .filter(|c| c.holds(&metrics, momentum5))
        .collect();

    Ok(ScoreResult {
        symbol: symbol.to_string(),
        score: hits.iter().map(|c| c.weight()).sum(),
        metrics,
        reasons: hits.iter().map(|c| c.reason().to_string()).collect(),
    })
}

/// Highest score first. Ties keep their input order.
pub fn rank(results: impl IntoIterator<Item = ScoreResult>, top: usize) -> Vec<ScoreResult> {
    let mut ranked: Vec<ScoreResult> = results.into_iter().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(top);
    ranked
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn metrics() -> Metrics {
        Metrics {
            last: 100.0,
            sma20: 100.0,
            sma60: 100.0,
            rsi14: 40.0,
            macd: 0.0,
            signal: 0.0,
            hi20: 200.0,
        }
    }

    fn scored(symbol: &str, score: u8) -> ScoreResult {
        ScoreResult {
            symbol: symbol.to_string(),
            score,
            metrics: metrics(),
            reasons: Vec::new(),
        }
    }

    #[test]
    fn weights_add_up_to_100() {
        let total: u32 = Criterion::ALL.iter().map(|c| u32::from(c.weight())).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn each_criterion_triggers_on_its_own() {
        let base = metrics();
        for c in Criterion::ALL {
            assert!(!c.holds(&base, 0.0), "{c:?} should not hold on neutral metrics");
        }

        let uptrend = Metrics { last: 103.0, sma20: 102.0, sma60: 101.0, ..base };
        assert!(Criterion::Uptrend.holds(&uptrend, 0.0));
        assert!(!Criterion::Uptrend.holds(&Metrics { sma60: 102.5, ..uptrend }, 0.0));

        assert!(Criterion::MacdBullish.holds(&Metrics { macd: 0.2, signal: 0.1, ..base }, 0.0));

        assert!(Criterion::RsiBand.holds(&Metrics { rsi14: 50.0, ..base }, 0.0));
        assert!(Criterion::RsiBand.holds(&Metrics { rsi14: 70.0, ..base }, 0.0));
        assert!(!Criterion::RsiBand.holds(&Metrics { rsi14: 70.1, ..base }, 0.0));

        assert!(Criterion::NearHigh.holds(&Metrics { hi20: 100.5, ..base }, 0.0));
        assert!(!Criterion::NearHigh.holds(&Metrics { hi20: 100.6, ..base }, 0.0));

        assert!(Criterion::Momentum.holds(&base, 0.01));
    }

    #[test]
    fn short_history_is_not_eligible() {
        let prices: Vec<f64> = (0..59).map(f64::from).collect();

        assert!(matches!(
            evaluate("A", &prices),
            Err(Error::InsufficientHistory { have: 59, need: 60 })
        ));
    }

    proptest! {
        #[test]
        fn rising_series_scores_at_least_trend_plus_momentum(
            start in 1.0f64..10_000.0,
            steps in prop::collection::vec(0.01f64..50.0, 59..400),
        ) {
            let prices: Vec<f64> = std::iter::once(start)
                .chain(steps.iter().scan(start, |p, step| {
                    *p += step;
                    Some(*p)
                }))
                .collect();

            let result = evaluate("A", &prices).unwrap();

            prop_assert!(result.score >= 40, "{}", result.score);
            prop_assert!(result.reasons.iter().any(|r| r == "uptrend"));
            prop_assert!(result.reasons.iter().any(|r| r == "positive short-term momentum"));
        }
    }

    #[test]
    fn reasons_follow_rubric_order_and_match_score() {
        let prices: Vec<f64> = (0..120).map(|i| 100.0 + 0.05 * (i * i) as f64).collect();

        let result = evaluate("A", &prices).unwrap();

        // Never a down day, so RSI pins at 100 and misses its band.
        assert_eq!(result.score, 80);
        assert_eq!(
            result.reasons,
            vec![
                "uptrend",
                "MACD bullish",
                "near/at 20-period high",
                "positive short-term momentum"
            ]
        );
        assert_eq!(result.metrics.last, result.metrics.hi20);
        assert_eq!(result.metrics.rsi14, 100.0);
    }

    #[test]
    fn falling_series_scores_zero() {
        let prices: Vec<f64> = (0..80).map(|i| 500.0 - 0.05 * (i * i) as f64).collect();

        let result = evaluate("A", &prices).unwrap();

        assert_eq!(result.score, 0);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn serialized_result_names_the_instrument() {
        let value = serde_json::to_value(scored("005930", 55)).unwrap();

        assert_eq!(value["instrument"], "005930");
        assert_eq!(value["score"], 55);
        assert!(value.get("symbol").is_none());
    }

    #[test]
    fn ties_keep_universe_order() {
        let ranked = rank([scored("A", 80), scored("B", 80), scored("C", 55)], 2);

        let symbols: Vec<&str> = ranked.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B"]);
    }

    #[test]
    fn rank_sorts_descending_and_handles_short_input() {
        let ranked = rank([scored("C", 55), scored("B", 90), scored("A", 55)], 10);

        let symbols: Vec<&str> = ranked.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["B", "C", "A"]);
    }
}
