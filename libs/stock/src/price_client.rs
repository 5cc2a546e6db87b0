use std::{sync::Arc, time::Duration};

use chrono::{Days, NaiveDate, Utc};
use chrono_tz::Tz;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::http::{HttpRequest, Method, Transport, truncate};

const TOKEN_PATH: &str = "/oauth2/tokenP";
const PRICE_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-price";
const DAILY_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-itemchartprice";

const PRICE_TR_ID: &str = "FHKST01010100";
const DAILY_TR_ID: &str = "FHKST03010100";

// "one token request per minute"
const RATE_LIMIT_MARKERS: &[&str] = &["EGW00133", "1분당 1회"];

#[derive(Debug)]
pub struct ProviderConfig {
    pub base_url: String,
    pub app_key: SecretString,
    pub app_secret: SecretString,
    pub timeout: Duration,
    pub rate_limit_cooldown: Duration,
    pub server_error_backoff: Duration,
    pub market_tz: Tz,
}

impl ProviderConfig {
    pub fn new(
        base_url: impl Into<String>,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            app_key: SecretString::new(app_key.into().into()),
            app_secret: SecretString::new(app_secret.into().into()),
            timeout: Duration::from_secs(20),
            rate_limit_cooldown: Duration::from_secs(65),
            server_error_backoff: Duration::from_secs(5),
            market_tz: chrono_tz::Asia::Seoul,
        }
    }
}

/// Short-lived bearer token issued by the provider.
#[derive(Debug)]
pub struct AccessToken(SecretString);

impl AccessToken {
    fn secret(&self) -> &str {
        self.0.expose_secret()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub close: f64,
}

/// Korea Investment open API client.
#[derive(Clone)]
pub struct PriceClient {
    transport: Arc<dyn Transport>,
    config: Arc<ProviderConfig>,
}

impl PriceClient {
    pub fn new(config: ProviderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    /// Issues a token. A rate-limit rejection is retried once after the
    /// cooldown, a 5xx once after the short backoff; anything else, or a
    /// second failure, is `CredentialUnavailable`.
    #[instrument(name = "acquire_credential", skip(self))]
    pub async fn acquire_credential(&self) -> Result<AccessToken> {
        let pause = match self.request_token().await {
            Ok(token) => return Ok(token),
            Err(e @ Error::RateLimited(_)) => {
                warn!(
                    error = %e,
                    cooldown_secs = self.config.rate_limit_cooldown.as_secs(),
                    "token request rate-limited, sleeping before retry"
                );
                self.config.rate_limit_cooldown
            }
            Err(e) if e.is_server_error() => {
                warn!(
                    error = %e,
                    backoff_secs = self.config.server_error_backoff.as_secs(),
                    "token endpoint server error, sleeping before retry"
                );
                self.config.server_error_backoff
            }
            Err(e) => return Err(Error::CredentialUnavailable(e.to_string())),
        };

        tokio::time::sleep(pause).await;

        self.request_token()
            .await
            .map_err(|e| Error::CredentialUnavailable(format!("after retry: {e}")))
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let req = HttpRequest::new(Method::Post, self.url(TOKEN_PATH, &[])?, self.config.timeout)
            .header("content-type", "application/json; charset=utf-8")
            .json(json!({
                "grant_type": "client_credentials",
                "appkey": self.config.app_key.expose_secret(),
                "appsecret": self.config.app_secret.expose_secret(),
            }));

        let res = self.transport.send(req).await?;
        if res.status == 403 && RATE_LIMIT_MARKERS.iter().any(|m| res.body.contains(m)) {
            return Err(Error::RateLimited(truncate(&res.body, 300)));
        }

        let body: TokenResponse = decode(res.into_json()?, "token")?;
        body.access_token
            .filter(|t| !t.is_empty())
            .map(|t| AccessToken(SecretString::new(t.into())))
            .ok_or_else(|| Error::ProtocolMismatch("token response without access_token".into()))
    }

    pub async fn fetch_current_price(&self, token: &AccessToken, symbol: &str) -> Result<f64> {
        let url = self.url(
            PRICE_PATH,
            &[("fid_cond_mrkt_div_code", "J"), ("fid_input_iscd", symbol)],
        )?;

        let body: PriceResponse = decode(
            self.transport
                .send(self.authed(url, token, PRICE_TR_ID))
                .await?
                .into_json()?,
            "price",
        )?;
        check_rt_cd(body.rt_cd.as_deref(), body.msg1.as_deref())?;

        body.output
            .and_then(|o| o.stck_prpr)
            .ok_or_else(|| {
                Error::ProtocolMismatch(format!(
                    "price response for {symbol} without output.stck_prpr"
                ))
            })
    }

    /// Daily closes, oldest first, at most `count` of the most recent.
    pub async fn fetch_daily_bars(
        &self,
        token: &AccessToken,
        symbol: &str,
        count: usize,
    ) -> Result<Vec<DailyBar>> {
        let end = Utc::now().with_timezone(&self.config.market_tz).date_naive();
        // Weekends and holidays: ask for roughly 1.5x the calendar span.
        let span = (count as u64 * 3 / 2).max(7) + 7;
        let start = end.checked_sub_days(Days::new(span)).unwrap_or(end);
        let (start, end) = (start.format("%Y%m%d").to_string(), end.format("%Y%m%d").to_string());

        let url = self.url(
            DAILY_PATH,
            &[
                ("FID_COND_MRKT_DIV_CODE", "J"),
                ("FID_INPUT_ISCD", symbol),
                ("FID_INPUT_DATE_1", start.as_str()),
                ("FID_INPUT_DATE_2", end.as_str()),
                ("FID_PERIOD_DIV_CODE", "D"),
                ("FID_ORG_ADJ_PRC", "0"),
            ],
        )?;

        let body: DailyResponse = decode(
            self.transport
                .send(self.authed(url, token, DAILY_TR_ID))
                .await?
                .into_json()?,
            "daily",
        )?;
        check_rt_cd(body.rt_cd.as_deref(), body.msg1.as_deref())?;

        let rows = body
            .output2
            .ok_or_else(|| Error::ProtocolMismatch("daily response without output2".into()))?;

        let bars = parse_daily_rows(&rows, count);
        debug!(symbol, rows = rows.len(), bars = bars.len(), "fetched daily bars");
        Ok(bars)
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<String> {
        let raw = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed
            .map(String::from)
            .map_err(|e| Error::Config(format!("provider url {raw:?}: {e}")))
    }

    fn authed(&self, url: String, token: &AccessToken, tr_id: &str) -> HttpRequest {
        HttpRequest::new(Method::Get, url, self.config.timeout)
            .bearer(token.secret())
            .header("appkey", self.config.app_key.expose_secret())
            .header("appsecret", self.config.app_secret.expose_secret())
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .header("content-type", "application/json; charset=utf-8")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    rt_cd: Option<String>,
    msg1: Option<String>,
    output: Option<PriceOutput>,
}

#[derive(Debug, Deserialize)]
struct PriceOutput {
    #[serde(default, deserialize_with = "lenient_number")]
    stck_prpr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DailyResponse {
    rt_cd: Option<String>,
    msg1: Option<String>,
    output2: Option<Vec<DailyRow>>,
}

#[derive(Debug, Deserialize)]
struct DailyRow {
    #[serde(default)]
    stck_bsop_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    stck_clpr: Option<f64>,
}

fn decode<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    serde_json::from_value(body)
        .map_err(|e| Error::ProtocolMismatch(format!("{what} response: {e}")))
}

/// The provider reports business errors as 200 with a non-zero `rt_cd`.
fn check_rt_cd(rt_cd: Option<&str>, msg1: Option<&str>) -> Result<()> {
    match rt_cd {
        Some(code) if code != "0" => Err(Error::ProtocolMismatch(format!(
            "rt_cd {code}: {}",
            msg1.unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}

/// Numbers arrive as strings (`"71500"`), sometimes blank. Anything that is
/// not a finite number reads as absent.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let n: Option<f64> = match raw {
        Some(Value::String(s)) => s.trim().parse().ok(),
        Some(other) => other.as_f64(),
        None => None,
    };
    Ok(n.filter(|n| n.is_finite()))
}

fn parse_daily_rows(rows: &[DailyRow], count: usize) -> Vec<DailyBar> {
    let mut bars: Vec<DailyBar> = rows
        .iter()
        .filter_map(|row| {
            Some(DailyBar {
                date: NaiveDate::parse_from_str(row.stck_bsop_date.as_deref()?.trim(), "%Y%m%d")
                    .ok()?,
                close: row.stck_clpr?,
            })
        })
        .collect();

    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);

    let skip = bars.len().saturating_sub(count);
    bars.split_off(skip)
}
