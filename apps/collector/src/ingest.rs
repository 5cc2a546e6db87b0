use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use stock::SeriesMaintainer;
use stock::series::IngestOutcome;
use tracing::{error, info, instrument, warn};
use tracing_futures::Instrument;

/// Pause between instruments to stay under the provider's request rate.
pub const INSTRUMENT_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub saved: usize,
    pub backfilled: usize,
    pub failures: usize,
}

/// Runs one ingestion cycle over `universe`, one instrument at a time.
///
/// Only a credential failure stops the run. Anything that goes wrong for a
/// single instrument is logged and counted.
#[instrument(name = "run_ingestion", skip_all, fields(instruments = universe.len()))]
pub async fn run_ingestion(
    maintainer: &SeriesMaintainer,
    universe: &[String],
    pause: Duration,
) -> stock::Result<IngestReport> {
    let token = match maintainer.source().acquire_credential().await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "no provider credential, aborting run");
            return Err(e);
        }
    };
    info!("credential acquired");

    let mut report = IngestReport::default();

    for (i, symbol) in universe.iter().enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        let span = tracing::info_span!("ingest_symbol", symbol = %symbol);
        let now_ms = Utc::now().timestamp_millis();

        match maintainer.ingest(&token, symbol, now_ms).instrument(span).await {
            Ok(ingested) => {
                report.saved += 1;
                if let IngestOutcome::Backfilled { .. } = ingested.outcome {
                    report.backfilled += 1;
                }
            }
            Err(e) => {
                report.failures += 1;
                warn!(symbol = %symbol, error = %e, "ingestion failed");
            }
        }
        report.processed += 1;
    }

    info!(
        processed = report.processed,
        saved = report.saved,
        backfilled = report.backfilled,
        failures = report.failures,
        "completed ingestion"
    );
    Ok(report)
}
