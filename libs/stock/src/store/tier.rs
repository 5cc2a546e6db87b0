use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use super::command::Command;
use crate::error::{Error, Result};
use crate::http::{HttpRequest, Method, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierKind {
    Batch,
    Path,
    Envelope,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierKind::Batch => "pipeline",
            TierKind::Path => "path",
            TierKind::Envelope => "command",
        })
    }
}

/// Where and how to reach the store.
pub struct Endpoint {
    base_url: Url,
    token: SecretString,
    timeout: Duration,
}

impl Endpoint {
    pub fn new(base_url: &str, token: SecretString, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("store url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("store url {base_url} cannot be a base")));
        }

        Ok(Self {
            base_url,
            token,
            timeout,
        })
    }

    fn url_with<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let mut url = self.base_url.clone();
        if segments.is_empty() {
            return url.to_string();
        }
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.to_string()
    }

    fn request(&self, method: Method, url: String) -> HttpRequest {
        HttpRequest::new(method, url, self.timeout).bearer(self.token.expose_secret())
    }
}

/// One wire dialect of the store's REST surface.
///
/// A tier gets exactly one attempt per call. Any error it returns sends the
/// client on to the next tier.
#[async_trait]
pub trait Tier: Send + Sync {
    fn kind(&self) -> TierKind;

    fn supports(&self, _commands: &[Command]) -> bool {
        true
    }

    async fn try_execute(
        &self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
        commands: &[Command],
    ) -> Result<Vec<Value>>;
}

/// `POST /pipeline` with a JSON array of commands.
pub struct BatchTier;

/// `GET /<VERB>/<key>/<args..>`, single reads only.
pub struct PathTier;

/// `POST /` with `{"command": [...]}`, one request per command.
pub struct EnvelopeTier;

pub fn default_tiers() -> Vec<Box<dyn Tier>> {
    vec![Box::new(BatchTier), Box::new(PathTier), Box::new(EnvelopeTier)]
}

#[async_trait]
impl Tier for BatchTier {
    fn kind(&self) -> TierKind {
        TierKind::Batch
    }

    async fn try_execute(
        &self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
        commands: &[Command],
    ) -> Result<Vec<Value>> {
        let req = endpoint
            .request(Method::Post, endpoint.url_with(&["pipeline"]))
            .json(serde_json::to_value(commands)?);

        let body = transport.send(req).await?.into_json()?;
        let Value::Array(items) = body else {
            return Err(Error::ProtocolMismatch(format!(
                "pipeline returned non-array: {body}"
            )));
        };
        if items.len() != commands.len() {
            return Err(Error::ProtocolMismatch(format!(
                "pipeline returned {} results for {} commands",
                items.len(),
                commands.len()
            )));
        }

        items.into_iter().map(take_result).collect()
    }
}

#[async_trait]
impl Tier for PathTier {
    fn kind(&self) -> TierKind {
        TierKind::Path
    }

    fn supports(&self, commands: &[Command]) -> bool {
        matches!(commands, [cmd] if cmd.is_read())
    }

    async fn try_execute(
        &self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
        commands: &[Command],
    ) -> Result<Vec<Value>> {
        let [cmd] = commands else {
            return Err(Error::ProtocolMismatch("path tier takes one command".into()));
        };

        let req = endpoint.request(Method::Get, endpoint.url_with(cmd.tokens()));
        let body = transport.send(req).await?.into_json()?;

        Ok(vec![take_result(body)?])
    }
}

#[async_trait]
impl Tier for EnvelopeTier {
    fn kind(&self) -> TierKind {
        TierKind::Envelope
    }

    async fn try_execute(
        &self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
        commands: &[Command],
    ) -> Result<Vec<Value>> {
        let url = endpoint.url_with::<&str>(&[]);
        let mut results = Vec::with_capacity(commands.len());

        for cmd in commands {
            let req = endpoint
                .request(Method::Post, url.clone())
                .json(json!({ "command": cmd }));
            let body = transport.send(req).await?.into_json()?;
            results.push(take_result(body)?);
        }

        Ok(results)
    }
}

/// Unwraps `{"result": ...}`; `{"error": ...}` or anything else is a mismatch.
fn take_result(item: Value) -> Result<Value> {
    match item {
        Value::Object(mut obj) => {
            if let Some(err) = obj.get("error") {
                return Err(Error::ProtocolMismatch(format!("command error: {err}")));
            }
            obj.remove("result")
                .ok_or_else(|| Error::ProtocolMismatch("missing \"result\"".into()))
        }
        other => Err(Error::ProtocolMismatch(format!("expected object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(base: &str) -> Endpoint {
        Endpoint::new(base, SecretString::new("t".into()), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn path_urls_encode_every_token() {
        let ep = endpoint("https://store.test/");
        let cmd = Command::lrange("SNAPSEQ:A B", 0, -1);

        assert_eq!(
            ep.url_with(cmd.tokens()),
            "https://store.test/LRANGE/SNAPSEQ:A%20B/0/-1"
        );
        assert_eq!(ep.url_with(&["pipeline"]), "https://store.test/pipeline");
        assert_eq!(ep.url_with::<&str>(&[]), "https://store.test/");
    }

    #[test]
    fn path_tier_only_takes_single_reads() {
        assert!(PathTier.supports(&[Command::llen("k")]));
        assert!(!PathTier.supports(&[Command::llen("k"), Command::llen("j")]));
        assert!(!PathTier.supports(&[Command::del("k")]));
    }

    #[test]
    fn take_result_rejects_errors_and_bare_values() {
        assert_eq!(take_result(json!({"result": 3})).unwrap(), json!(3));
        assert_eq!(take_result(json!({"result": null})).unwrap(), Value::Null);
        assert!(take_result(json!({"error": "WRONGTYPE"})).is_err());
        assert!(take_result(json!([1])).is_err());
    }
}
