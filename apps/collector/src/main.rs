use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use collector::{config::Config, ingest, rank};
use serde_json::json;
use stock::http::{ReqwestTransport, Transport};
use stock::series::load_snapshot;
use stock::{PriceClient, SeriesMaintainer, StoreClient};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "collector")]
#[command(about = "Collects KRX prices into a REST key-value store and ranks them")]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Fetch the current price of every ticker and update its series
    Ingest,
    /// Score the tracked tickers and print the ranking
    Score {
        /// How many results to return
        #[arg(long, default_value = "10")]
        top: usize,

        /// Serve the cached ranking when there is one
        #[arg(long)]
        cached: bool,
    },
    /// Check which store protocol answers
    Health,
    /// Print the latest snapshot of a ticker
    Snapshot { ticker: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "collector={},stock={}",
                cli.log_level, cli.log_level
            ))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    let transport: Arc<dyn Transport> =
        Arc::new(ReqwestTransport::new().context("init http transport failed")?);
    let store = StoreClient::new(config.store_config(), Arc::clone(&transport))
        .context("init store client failed")?;

    match cli.command {
        Cmd::Ingest => {
            let source = PriceClient::new(config.provider_config()?, transport);
            let maintainer = SeriesMaintainer::new(store, source, config.series_config());
            info!(tickers = config.tickers.len(), "starting ingestion");

            let report =
                ingest::run_ingestion(&maintainer, &config.tickers, ingest::INSTRUMENT_PAUSE)
                    .await?;
            print_json(&report)?;
        }
        Cmd::Score { top, cached } => {
            let hit = if cached {
                rank::load_cached(&store, top).await
            } else {
                None
            };
            let ranking = match hit {
                Some(ranking) => {
                    info!(results = ranking.len(), "serving cached ranking");
                    ranking
                }
                None => rank::run_scoring(&store, &config.tickers, top, config.reco_ttl).await,
            };
            print_json(&ranking)?;
        }
        Cmd::Health => {
            let report = store.ping().await.context("store unreachable on every tier")?;
            print_json(&json!({
                "ok": true,
                "method": report.tier.to_string(),
                "resp": report.response,
            }))?;
        }
        Cmd::Snapshot { ticker } => {
            let snapshot = load_snapshot(&store, &ticker)
                .await
                .ok_or_else(|| anyhow!("no snapshot for {ticker} yet"))?;
            print_json(&json!({
                "ticker": ticker,
                "serverTs": Utc::now().timestamp_millis(),
                "dataTs": snapshot.timestamp,
                "price": snapshot.price,
            }))?;
        }
    }

    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
