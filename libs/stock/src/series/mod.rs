mod maintainer;

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::store::StoreClient;

pub use maintainer::{IngestOutcome, Ingested, SeriesConfig, SeriesMaintainer};

pub fn snapshot_key(symbol: &str) -> String {
    format!("SNAP:{symbol}")
}

pub fn series_key(symbol: &str) -> String {
    format!("SNAPSEQ:{symbol}")
}

/// One observation. Stored as `"<timestamp>:<price>"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

impl PricePoint {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price }
    }
}

impl fmt::Display for PricePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.price)
    }
}

impl FromStr for PricePoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || Error::MalformedData(s.to_string());

        let (ts, price) = s.split_once(':').ok_or_else(malformed)?;
        if price.contains(':') {
            return Err(malformed());
        }

        let timestamp: i64 = ts.trim().parse().map_err(|_| malformed())?;
        let price: f64 = price.trim().parse().map_err(|_| malformed())?;
        if timestamp < 0 || !price.is_finite() {
            return Err(malformed());
        }

        Ok(Self { timestamp, price })
    }
}

/// Latest known observation for a symbol. Expires with its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub price: f64,
}

impl Snapshot {
    pub fn from_mapping(map: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            timestamp: map.get("ts")?.parse().ok()?,
            price: map.get("price")?.parse().ok()?,
        })
    }
}

/// Decodes stored entries newest-first and returns them oldest-first,
/// dropping anything malformed.
pub fn decode_series<S: AsRef<str>>(newest_first: &[S]) -> Vec<PricePoint> {
    newest_first
        .iter()
        .rev()
        .filter_map(|raw| match raw.as_ref().parse::<PricePoint>() {
            Ok(p) => Some(p),
            Err(e) => {
                debug!(error = %e, "skipping stored point");
                None
            }
        })
        .collect()
}

/// Oldest-first history of a symbol. Empty when nothing is stored or the
/// store can't be read.
pub async fn load_series(store: &StoreClient, symbol: &str) -> Vec<PricePoint> {
    decode_series(&store.list_range(&series_key(symbol), 0, -1).await)
}

pub async fn load_snapshot(store: &StoreClient, symbol: &str) -> Option<Snapshot> {
    Snapshot::from_mapping(&store.get_mapping(&snapshot_key(symbol)).await)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn point_round_trips_through_its_encoding(
            timestamp in 0i64..=i64::MAX,
            price in any::<f64>().prop_filter("finite", |p| p.is_finite()),
        ) {
            let p = PricePoint::new(timestamp, price);
            let encoded = p.to_string();
            prop_assert_eq!(encoded.parse::<PricePoint>().unwrap(), p);
        }

        #[test]
        fn text_without_a_separator_never_decodes(raw in "[^:]*") {
            prop_assert!(raw.parse::<PricePoint>().is_err());
            prop_assert!(decode_series(&[raw]).is_empty());
        }
    }

    #[test]
    fn integral_prices_encode_without_a_fraction() {
        assert_eq!(PricePoint::new(5, 70_000.0).to_string(), "5:70000");
    }

    #[test]
    fn accepts_encodings_written_by_other_clients() {
        assert_eq!(
            "1717000000000:70000.0".parse::<PricePoint>().unwrap(),
            PricePoint::new(1_717_000_000_000, 70_000.0)
        );
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        for raw in ["", "1717", "1:2:3", "abc:1.0", "1:abc", "-1:5", "1:NaN", "1:inf"] {
            assert!(
                matches!(raw.parse::<PricePoint>(), Err(Error::MalformedData(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn decode_reverses_and_skips_garbage() {
        let stored = ["3:30", "garbage", "2:20", "1:10"];

        let points = decode_series(&stored);

        assert_eq!(
            points,
            vec![PricePoint::new(1, 10.0), PricePoint::new(2, 20.0), PricePoint::new(3, 30.0)]
        );
    }

    #[test]
    fn snapshot_needs_both_fields() {
        let mut map = HashMap::new();
        map.insert("ts".to_string(), "10".to_string());
        assert_eq!(Snapshot::from_mapping(&map), None);

        map.insert("price".to_string(), "71500".to_string());
        assert_eq!(
            Snapshot::from_mapping(&map),
            Some(Snapshot { timestamp: 10, price: 71_500.0 })
        );
    }
}
