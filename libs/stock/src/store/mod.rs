mod command;
mod tier;

use std::{collections::HashMap, sync::Arc, time::Duration};

use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::http::Transport;

pub use command::Command;
pub use tier::{BatchTier, Endpoint, EnvelopeTier, PathTier, Tier, TierKind, default_tiers};

#[derive(Debug)]
pub struct StoreConfig {
    pub base_url: String,
    pub token: SecretString,
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: SecretString::new(token.into().into()),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub tier: TierKind,
    pub response: Value,
}

/// Remote key-value store reached over its REST surface.
///
/// Every call walks the configured tiers in order until one answers. Reads
/// that nobody answers come back empty; writes fail with `StoreUnavailable`.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    tiers: Vec<Box<dyn Tier>>,
}

impl StoreClient {
    pub fn new(config: StoreConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_tiers(config, transport, default_tiers())
    }

    pub fn with_tiers(
        config: StoreConfig,
        transport: Arc<dyn Transport>,
        tiers: Vec<Box<dyn Tier>>,
    ) -> Result<Self> {
        let endpoint = Endpoint::new(&config.base_url, config.token, config.timeout)?;

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                endpoint,
                tiers,
            }),
        })
    }

    /// Results line up with `commands`. An empty vec means every tier failed
    /// on an all-read batch.
    pub async fn execute_batch(&self, commands: &[Command]) -> Result<Vec<Value>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        match self.dispatch(commands).await {
            Ok((_, results)) => Ok(results),
            Err(e) if commands.iter().all(Command::is_read) => {
                warn!(verb = commands[0].verb(), error = %e, "store read failed on every tier");
                Ok(Vec::new())
            }
            Err(e) => {
                error!(
                    verbs = ?commands.iter().map(Command::verb).collect::<Vec<_>>(),
                    error = %e,
                    "store write failed on every tier"
                );
                Err(e)
            }
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Option<Value>> {
        Ok(self.execute_batch(&[command]).await?.into_iter().next())
    }

    /// Reads a hash as a flat mapping. Missing key or any failure gives an
    /// empty mapping.
    pub async fn get_mapping(&self, key: &str) -> HashMap<String, String> {
        let value = match self.execute(Command::hgetall(key)).await {
            Ok(Some(v)) => v,
            _ => return HashMap::new(),
        };

        match value {
            Value::Array(items) => {
                let mut it = items.iter().map(scalar_to_string);
                let mut map = HashMap::new();
                while let (Some(k), Some(v)) = (it.next(), it.next()) {
                    map.insert(k, v);
                }
                map
            }
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect(),
            _ => HashMap::new(),
        }
    }

    /// `None` when no tier could read the length. A missing key is `Some(0)`.
    pub async fn list_len(&self, key: &str) -> Option<usize> {
        match self.execute(Command::llen(key)).await {
            Ok(Some(Value::Number(n))) => n.as_u64().map(|n| n as usize),
            Ok(Some(Value::String(s))) => s.parse().ok(),
            _ => None,
        }
    }

    pub async fn list_range(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        match self.execute(Command::lrange(key, start, stop)).await {
            Ok(Some(Value::Array(items))) => items.iter().map(scalar_to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// `PING` through the tiers, reporting the first that answered.
    pub async fn ping(&self) -> Result<HealthReport> {
        let (tier, mut results) = self.dispatch(&[Command::ping()]).await?;

        Ok(HealthReport {
            tier,
            response: results.pop().unwrap_or(Value::Null),
        })
    }

    async fn dispatch(&self, commands: &[Command]) -> Result<(TierKind, Vec<Value>)> {
        let inner = &*self.inner;
        let mut last_err = None;

        for tier in inner.tiers.iter().filter(|t| t.supports(commands)) {
            match tier
                .try_execute(inner.transport.as_ref(), &inner.endpoint, commands)
                .await
            {
                Ok(results) => {
                    debug!(tier = %tier.kind(), commands = commands.len(), "store call ok");
                    return Ok((tier.kind(), results));
                }
                Err(e) => {
                    debug!(tier = %tier.kind(), error = %e, "store tier failed, falling through");
                    last_err = Some(e);
                }
            }
        }

        Err(Error::StoreUnavailable(match last_err {
            Some(e) => e.to_string(),
            None => "no tier accepts this command".to_string(),
        }))
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
