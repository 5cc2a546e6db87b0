use std::time::Duration;

use futures::{StreamExt, stream};
use stock::Error;
use stock::scoring::{ScoreResult, evaluate, rank};
use stock::series::load_series;
use stock::store::{Command, StoreClient};
use tracing::{debug, info, instrument, warn};

/// Cache key for the latest ranking. Fixed regardless of the requested size.
pub const RECO_KEY: &str = "RECO:TOP10";

/// Scores every instrument in `universe` and returns the best `top`.
///
/// Instruments without enough history, or whose history can't be read, are
/// left out. The whole eligible ranking is cached under `RECO_KEY` before it
/// is cut to `top`; a failed cache write is logged and does not affect the
/// result.
#[instrument(name = "run_scoring", skip_all, fields(instruments = universe.len(), top = top))]
pub async fn run_scoring(
    store: &StoreClient,
    universe: &[String],
    top: usize,
    reco_ttl: Duration,
) -> Vec<ScoreResult> {
    let scored: Vec<ScoreResult> = stream::iter(universe)
        .then(|symbol| async move {
            let prices: Vec<f64> = load_series(store, symbol)
                .await
                .iter()
                .map(|p| p.price)
                .collect();

            match evaluate(symbol, &prices) {
                Ok(result) => {
                    debug!(symbol = %symbol, score = result.score, "scored");
                    Some(result)
                }
                Err(Error::InsufficientHistory { have, need }) => {
                    info!(symbol = %symbol, have, need, "not enough history, skipping");
                    None
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "scoring failed, skipping");
                    None
                }
            }
        })
        .filter_map(|r| async move { r })
        .collect()
        .await;

    let eligible = scored.len();
    let mut ranked = rank(scored, eligible);
    cache_ranking(store, &ranked, reco_ttl).await;

    ranked.truncate(top);
    info!(eligible, returned = ranked.len(), "ranking ready");
    ranked
}

async fn cache_ranking(store: &StoreClient, ranked: &[ScoreResult], ttl: Duration) {
    let payload = match serde_json::to_string(ranked) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "could not encode ranking for cache");
            return;
        }
    };

    match store
        .execute(Command::set_ex(RECO_KEY, &payload, ttl.as_secs()))
        .await
    {
        Ok(_) => debug!(key = RECO_KEY, "ranking cached"),
        Err(e) => warn!(key = RECO_KEY, error = %e, "ranking cache write failed"),
    }
}

/// The cached ranking cut to `top`, if one is present and decodes.
pub async fn load_cached(store: &StoreClient, top: usize) -> Option<Vec<ScoreResult>> {
    let raw = match store.execute(Command::get(RECO_KEY)).await {
        Ok(Some(serde_json::Value::String(raw))) => raw,
        _ => return None,
    };

    match serde_json::from_str::<Vec<ScoreResult>>(&raw) {
        Ok(mut cached) => {
            cached.truncate(top);
            Some(cached)
        }
        Err(e) => {
            debug!(error = %e, "cached ranking unreadable");
            None
        }
    }
}
