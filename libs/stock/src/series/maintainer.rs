use std::time::Duration;

use chrono::{NaiveTime, TimeZone};
use chrono_tz::Tz;
use tracing::{debug, error, info, instrument, warn};

use super::{PricePoint, series_key, snapshot_key};
use crate::error::Result;
use crate::price_client::{AccessToken, DailyBar, PriceClient};
use crate::store::{Command, StoreClient};

#[derive(Debug, Clone)]
pub struct SeriesConfig {
    pub snapshot_ttl: Duration,
    /// Most entries a series may hold.
    pub capacity: usize,
    /// Below this many entries a series is backfilled from daily bars.
    pub warmup: usize,
    pub backfill_bars: usize,
    pub market_tz: Tz,
    /// Local time a daily bar is stamped with.
    pub close_time: NaiveTime,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            snapshot_ttl: Duration::from_secs(300),
            capacity: 600,
            warmup: 60,
            backfill_bars: 100,
            market_tz: chrono_tz::Asia::Seoul,
            close_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    /// The series was replaced with `bars` daily closes plus the live point.
    Backfilled { bars: usize },
    /// Backfill was due but produced nothing; only the live point went in.
    BackfillUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ingested {
    pub price: f64,
    pub outcome: IngestOutcome,
}

/// Keeps the snapshot and the capped, newest-first series of each symbol.
#[derive(Clone)]
pub struct SeriesMaintainer {
    store: StoreClient,
    source: PriceClient,
    config: SeriesConfig,
}

impl SeriesMaintainer {
    pub fn new(store: StoreClient, source: PriceClient, config: SeriesConfig) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    pub fn source(&self) -> &PriceClient {
        &self.source
    }

    /// One ingestion cycle for `symbol`. Errors abort this symbol only.
    #[instrument(name = "ingest", skip(self, token, now_ms))]
    pub async fn ingest(&self, token: &AccessToken, symbol: &str, now_ms: i64) -> Result<Ingested> {
        let price = self.source.fetch_current_price(token, symbol).await?;
        self.save_snapshot(symbol, now_ms, price).await?;

        let live = PricePoint::new(now_ms, price);
        let key = series_key(symbol);

        let outcome = match self.store.list_len(&key).await {
            Some(len) if len >= self.config.warmup => {
                self.append(&key, live).await?;
                IngestOutcome::Appended
            }
            Some(len) => self.backfill(token, symbol, &key, len, live).await?,
            None => {
                // Never rewrite a series whose length we could not read.
                warn!("series length unknown, appending live point only");
                self.append(&key, live).await?;
                IngestOutcome::Appended
            }
        };

        info!(price, outcome = ?outcome, "series updated");
        Ok(Ingested { price, outcome })
    }

    async fn backfill(
        &self,
        token: &AccessToken,
        symbol: &str,
        key: &str,
        len: usize,
        live: PricePoint,
    ) -> Result<IngestOutcome> {
        let points = match self
            .source
            .fetch_daily_bars(token, symbol, self.config.backfill_bars)
            .await
        {
            Ok(bars) => self.closing_points(&bars, live.timestamp),
            Err(e) => {
                warn!(len, error = %e, "daily bars unavailable");
                Vec::new()
            }
        };

        if points.is_empty() {
            debug!(len, "no usable daily bars, appending live point only");
            self.append(key, live).await?;
            return Ok(IngestOutcome::BackfillUnavailable);
        }

        let bars = points.len();
        self.replace(key, &points, live).await?;
        Ok(IngestOutcome::Backfilled { bars })
    }

    async fn save_snapshot(&self, symbol: &str, now_ms: i64, price: f64) -> Result<()> {
        let key = snapshot_key(symbol);
        self.store
            .execute_batch(&[
                Command::hset(&key, [("ts", now_ms.to_string()), ("price", price.to_string())]),
                Command::expire(&key, self.config.snapshot_ttl.as_secs()),
            ])
            .await?;
        Ok(())
    }

    async fn append(&self, key: &str, live: PricePoint) -> Result<()> {
        self.store
            .execute_batch(&[Command::lpush(key, [live]), self.trim(key)])
            .await?;
        Ok(())
    }

    /// Daily bars stamped at the market close, oldest first.
    ///
    /// Bars not closed before `before` (today's bar while the market is still
    /// open) are dropped. Only the newest bars that leave room for the live
    /// point are kept.
    fn closing_points(&self, bars: &[DailyBar], before: i64) -> Vec<PricePoint> {
        let mut points: Vec<PricePoint> = bars
            .iter()
            .filter_map(|bar| {
                let local = bar.date.and_time(self.config.close_time);
                let at = self.config.market_tz.from_local_datetime(&local).earliest()?;
                Some(PricePoint::new(at.timestamp_millis(), bar.close))
            })
            .filter(|p| p.timestamp < before)
            .collect();

        let room = self.config.capacity.saturating_sub(1);
        points.split_off(points.len().saturating_sub(room))
    }

    /// Rewrites the series as `points` (oldest first) followed by `live`.
    async fn replace(&self, key: &str, points: &[PricePoint], live: PricePoint) -> Result<()> {
        let commands = [
            Command::del(key),
            Command::lpush(key, points),
            Command::lpush(key, [live]),
            self.trim(key),
        ];

        if let Err(e) = self.store.execute_batch(&commands).await {
            // Tiers that send one request per command may have applied a prefix.
            error!(
                key,
                bars = points.len(),
                error = %e,
                "backfill failed part-way, series may hold a partial rewrite"
            );
            if let Err(trim_err) = self.store.execute(self.trim(key)).await {
                warn!(key, error = %trim_err, "could not re-trim series after failed backfill");
            }
            return Err(e);
        }
        Ok(())
    }

    fn trim(&self, key: &str) -> Command {
        Command::ltrim(key, 0, self.config.capacity as i64 - 1)
    }
}
