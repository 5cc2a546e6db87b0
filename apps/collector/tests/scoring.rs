use std::{sync::Arc, time::Duration};

use collector::rank::{RECO_KEY, load_cached, run_scoring};
use stock::PricePoint;
use stock::testing::MemoryStore;
use stock::{StoreClient, StoreConfig};

const TTL: Duration = Duration::from_secs(600);

fn client(store: &Arc<MemoryStore>) -> StoreClient {
    StoreClient::new(StoreConfig::new("https://store.test", "tok"), store.clone()).unwrap()
}

/// Stores `prices` (oldest first) the way the series is kept: newest at the head.
fn seed(store: &MemoryStore, symbol: &str, prices: &[f64]) {
    let encoded: Vec<String> = prices
        .iter()
        .enumerate()
        .rev()
        .map(|(i, &p)| PricePoint::new(i as i64 * 1_000, p).to_string())
        .collect();
    store.seed_list(&format!("SNAPSEQ:{symbol}"), encoded);
}

fn accelerating(len: usize) -> Vec<f64> {
    (0..len).map(|i| 100.0 + 0.05 * (i * i) as f64).collect()
}

fn universe(symbols: &[&str]) -> Vec<String> {
    symbols.iter().map(|s| s.to_string()).collect()
}

fn symbols(ranked: &[stock::scoring::ScoreResult]) -> Vec<&str> {
    ranked.iter().map(|r| r.symbol.as_str()).collect()
}

#[tokio::test]
async fn equal_scores_keep_universe_order() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "A", &accelerating(120));
    seed(&store, "B", &accelerating(120));
    seed(&store, "C", &vec![100.0; 120]);
    let client = client(&store);

    let ranked = run_scoring(&client, &universe(&["A", "B", "C"]), 2, TTL).await;
    assert_eq!(symbols(&ranked), vec!["A", "B"]);
    assert_eq!(ranked[0].score, ranked[1].score);

    let ranked = run_scoring(&client, &universe(&["C", "B", "A"]), 3, TTL).await;
    assert_eq!(symbols(&ranked), vec!["B", "A", "C"]);
    assert!(ranked[1].score > ranked[2].score);
}

#[tokio::test]
async fn short_and_missing_history_is_excluded() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "A", &accelerating(59));
    seed(&store, "B", &accelerating(60));
    store.seed_list("SNAPSEQ:C", ["garbage", "1:x"]);
    let client = client(&store);

    let ranked = run_scoring(&client, &universe(&["A", "B", "C", "D"]), 10, TTL).await;

    assert_eq!(symbols(&ranked), vec!["B"]);
}

#[tokio::test]
async fn ranking_is_cached_with_ttl_and_served_back() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "A", &accelerating(100));
    seed(&store, "B", &vec![50.0; 100]);
    let client = client(&store);

    assert!(load_cached(&client, 10).await.is_none());

    let ranked = run_scoring(&client, &universe(&["A", "B"]), 10, TTL).await;

    assert!(store.string(RECO_KEY).is_some());
    assert_eq!(store.ttl(RECO_KEY), Some(600));
    let cached = load_cached(&client, 10).await.unwrap();
    assert_eq!(symbols(&cached), symbols(&ranked));
    assert_eq!(cached[0].score, ranked[0].score);
    assert_eq!(cached[0].reasons, ranked[0].reasons);

    let cut = load_cached(&client, 1).await.unwrap();
    assert_eq!(symbols(&cut), vec!["A"]);
}

#[tokio::test]
async fn cache_holds_the_full_ranking_whatever_was_asked_for() {
    let store = Arc::new(MemoryStore::new());
    for (symbol, len) in [("A", 100), ("B", 90), ("C", 80), ("D", 70)] {
        seed(&store, symbol, &accelerating(len));
    }
    let client = client(&store);

    let ranked = run_scoring(&client, &universe(&["A", "B", "C", "D"]), 1, TTL).await;
    assert_eq!(ranked.len(), 1);

    let cached = load_cached(&client, 10).await.unwrap();
    assert_eq!(cached.len(), 4);
    assert_eq!(cached[0].symbol, ranked[0].symbol);
}

#[tokio::test]
async fn cache_write_failure_does_not_change_the_result() {
    let healthy = Arc::new(MemoryStore::new());
    let broken = Arc::new(MemoryStore::new().failing_verb("SET"));
    for store in [&healthy, &broken] {
        seed(store, "A", &accelerating(100));
        seed(store, "B", &vec![50.0; 100]);
    }
    let symbols = universe(&["A", "B"]);

    let expected = run_scoring(&client(&healthy), &symbols, 10, TTL).await;
    let ranked = run_scoring(&client(&broken), &symbols, 10, TTL).await;

    assert_eq!(ranked, expected);
    assert_eq!(ranked.len(), 2);
    assert_eq!(broken.string(RECO_KEY), None);
}

#[tokio::test]
async fn unreadable_store_yields_an_empty_ranking() {
    use stock::store::TierKind;

    let store = Arc::new(
        MemoryStore::new()
            .failing(TierKind::Batch)
            .failing(TierKind::Path)
            .failing(TierKind::Envelope),
    );
    seed(&store, "A", &accelerating(100));

    let ranked = run_scoring(&client(&store), &universe(&["A"]), 10, TTL).await;

    assert!(ranked.is_empty());
}
