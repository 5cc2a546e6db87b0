use std::{env::var, time::Duration};

use anyhow::{Result, anyhow, bail};
use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use stock::{ProviderConfig, SeriesConfig, StoreConfig};

const DEFAULT_KIS_BASE: &str = "https://openapi.koreainvestment.com:9443";
const DEFAULT_TICKERS: &str = "005930,000660";

#[derive(Debug)]
pub struct Config {
    pub store_url: String,
    pub store_token: SecretString,
    pub kis_base: String,
    pub kis_app_key: Option<SecretString>,
    pub kis_app_secret: Option<SecretString>,
    pub tickers: Vec<String>,
    pub snapshot_ttl: Duration,
    pub reco_ttl: Duration,
    pub market_tz: Tz,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| var(name).ok())
    }

    /// Builds the config from any name to value lookup. Blank values count
    /// as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = ["UPSTASH_URL", "UPSTASH_TOKEN"]
            .into_iter()
            .filter(|name| get(name).is_none())
            .collect();
        if !missing.is_empty() {
            bail!("missing required environment: {}", missing.join(", "));
        }

        let secret = |name: &str| get(name).map(|v| SecretString::new(v.into()));

        Ok(Self {
            store_url: get("UPSTASH_URL").unwrap_or_default(),
            store_token: secret("UPSTASH_TOKEN").unwrap_or_else(|| SecretString::new("".into())),
            kis_base: get("KIS_BASE").unwrap_or_else(|| DEFAULT_KIS_BASE.to_string()),
            kis_app_key: secret("KIS_APP_KEY"),
            kis_app_secret: secret("KIS_APP_SECRET"),
            tickers: parse_tickers(&get("TICKERS").unwrap_or_else(|| DEFAULT_TICKERS.to_string())),
            snapshot_ttl: seconds("TTL_SEC", get("TTL_SEC"), 300)?,
            reco_ttl: seconds("RECO_TTL_SEC", get("RECO_TTL_SEC"), 600)?,
            market_tz: match get("MARKET_TZ") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("MARKET_TZ {raw:?} is not a known time zone"))?,
                None => chrono_tz::Asia::Seoul,
            },
        })
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.store_url, self.store_token.expose_secret())
    }

    /// Provider credentials are only needed for ingestion.
    pub fn provider_config(&self) -> Result<ProviderConfig> {
        match (&self.kis_app_key, &self.kis_app_secret) {
            (Some(key), Some(secret)) => {
                let mut config =
                    ProviderConfig::new(&self.kis_base, key.expose_secret(), secret.expose_secret());
                config.market_tz = self.market_tz;
                Ok(config)
            }
            (key, secret) => {
                let missing: Vec<&str> = [("KIS_APP_KEY", key), ("KIS_APP_SECRET", secret)]
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(name, _)| name)
                    .collect();
                bail!("missing required environment: {}", missing.join(", "))
            }
        }
    }

    pub fn series_config(&self) -> SeriesConfig {
        SeriesConfig {
            snapshot_ttl: self.snapshot_ttl,
            market_tz: self.market_tz,
            ..SeriesConfig::default()
        }
    }
}

fn parse_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn seconds(name: &str, raw: Option<String>, default: u64) -> Result<Duration> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| anyhow!("{name} must be a whole number of seconds, got {raw:?}")),
        None => Ok(Duration::from_secs(default)),
    }
}
