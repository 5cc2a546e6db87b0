//! Offline transports for tests.
//!
//! `MemoryStore` answers all three store tiers from in-process state and can
//! be told to fail any tier or any verb. `ScriptedTransport` replays canned
//! responses keyed by method and path and records what it was sent.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::http::{HttpRequest, HttpResponse, Method, Transport};
use crate::store::TierKind;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct State {
    strings: HashMap<String, String>,
    hashes: HashMap<String, Vec<(String, String)>>,
    lists: HashMap<String, VecDeque<String>>,
    ttls: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    hits: Mutex<HashMap<TierKind, usize>>,
    failing: HashSet<TierKind>,
    failing_verbs: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request on `tier` gets a 503.
    pub fn failing(mut self, tier: TierKind) -> Self {
        self.failing.insert(tier);
        self
    }

    /// Any request carrying `verb` gets a 500, whatever the tier.
    pub fn failing_verb(mut self, verb: &str) -> Self {
        self.failing_verbs.insert(verb.to_ascii_uppercase());
        self
    }

    /// Seeds a list, head first.
    pub fn seed_list<I, T>(&self, key: &str, items: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        lock(&self.state)
            .lists
            .insert(key.to_string(), items.into_iter().map(Into::into).collect());
    }

    /// List contents, head first.
    pub fn list(&self, key: &str) -> Vec<String> {
        lock(&self.state)
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn string(&self, key: &str) -> Option<String> {
        lock(&self.state).strings.get(key).cloned()
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        lock(&self.state).ttls.get(key).copied()
    }

    pub fn hits(&self, tier: TierKind) -> usize {
        lock(&self.hits).get(&tier).copied().unwrap_or(0)
    }

    fn run(&self, tokens: &[String]) -> Result<Value, String> {
        let mut st = lock(&self.state);
        let verb = tokens.first().map(|v| v.to_ascii_uppercase()).unwrap_or_default();
        let args = tokens.get(1..).unwrap_or_default();
        let key = || args.first().cloned().ok_or_else(|| format!("ERR wrong number of arguments for {verb}"));
        let int = |i: usize| -> Result<i64, String> {
            args.get(i)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| "ERR value is not an integer".to_string())
        };

        let value = match verb.as_str() {
            "PING" => json!("PONG"),
            "GET" => st.strings.get(&key()?).map_or(Value::Null, |s| json!(s)),
            "SET" => {
                let k = key()?;
                let v = args.get(1).cloned().ok_or("ERR syntax error")?;
                if args.get(2).is_some_and(|a| a.eq_ignore_ascii_case("EX")) {
                    st.ttls.insert(k.clone(), int(3)? as u64);
                }
                st.strings.insert(k, v);
                json!("OK")
            }
            "DEL" => {
                let mut removed = 0;
                for k in args {
                    let hit = st.strings.remove(k).is_some()
                        | st.hashes.remove(k).is_some()
                        | st.lists.remove(k).is_some();
                    st.ttls.remove(k);
                    removed += hit as i64;
                }
                json!(removed)
            }
            "EXPIRE" => {
                let k = key()?;
                let exists = st.strings.contains_key(&k)
                    || st.hashes.contains_key(&k)
                    || st.lists.contains_key(&k);
                if exists {
                    st.ttls.insert(k, int(1)? as u64);
                }
                json!(exists as i64)
            }
            "HSET" => {
                let k = key()?;
                let hash = st.hashes.entry(k).or_default();
                let mut added = 0;
                for pair in args[1..].chunks(2) {
                    let [f, v] = pair else {
                        return Err("ERR wrong number of arguments for HSET".into());
                    };
                    match hash.iter_mut().find(|(name, _)| name == f) {
                        Some(slot) => slot.1 = v.clone(),
                        None => {
                            hash.push((f.clone(), v.clone()));
                            added += 1;
                        }
                    }
                }
                json!(added)
            }
            "HGETALL" => {
                let flat: Vec<&String> = st
                    .hashes
                    .get(&key()?)
                    .into_iter()
                    .flatten()
                    .flat_map(|(f, v)| [f, v])
                    .collect();
                json!(flat)
            }
            "LPUSH" | "RPUSH" => {
                let list = st.lists.entry(key()?).or_default();
                for v in &args[1..] {
                    if verb == "LPUSH" {
                        list.push_front(v.clone());
                    } else {
                        list.push_back(v.clone());
                    }
                }
                json!(list.len())
            }
            "LLEN" => json!(st.lists.get(&key()?).map_or(0, VecDeque::len)),
            "LRANGE" => {
                let list = st.lists.get(&key()?).cloned().unwrap_or_default();
                let items: Vec<String> = match bounds(list.len(), int(1)?, int(2)?) {
                    Some((lo, hi)) => list.range(lo..=hi).cloned().collect(),
                    None => Vec::new(),
                };
                json!(items)
            }
            "LTRIM" => {
                let k = key()?;
                let (start, stop) = (int(1)?, int(2)?);
                if let Some(list) = st.lists.get_mut(&k) {
                    match bounds(list.len(), start, stop) {
                        Some((lo, hi)) => {
                            list.truncate(hi + 1);
                            list.drain(..lo);
                        }
                        None => list.clear(),
                    }
                }
                json!("OK")
            }
            other => return Err(format!("ERR unknown command '{other}'")),
        };

        Ok(value)
    }

    fn run_wrapped(&self, tokens: &[String]) -> Value {
        match self.run(tokens) {
            Ok(v) => json!({ "result": v }),
            Err(e) => json!({ "error": e }),
        }
    }
}

/// Redis-style inclusive index window, negative indexes from the tail.
fn bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn tokens_of(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|t| t.as_str().map(str::to_string))
        .collect()
}

fn percent_decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| segment.to_string())
}

fn reply(status: u16, body: Value) -> Result<HttpResponse> {
    Ok(HttpResponse {
        status,
        body: body.to_string(),
    })
}

#[async_trait]
impl Transport for MemoryStore {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let path = request.path();
        let tier = match (request.method, path.as_str()) {
            (Method::Post, "/pipeline") => TierKind::Batch,
            (Method::Post, "/") => TierKind::Envelope,
            (Method::Get, _) => TierKind::Path,
            _ => return reply(404, json!({ "error": "not found" })),
        };
        *lock(&self.hits).entry(tier).or_default() += 1;

        if !request.headers.iter().any(|(n, v)| n == "authorization" && v.starts_with("Bearer ")) {
            return reply(401, json!({ "error": "Unauthorized" }));
        }
        if self.failing.contains(&tier) {
            return reply(503, json!({ "error": format!("{tier} disabled") }));
        }

        let commands: Vec<Vec<String>> = match tier {
            TierKind::Batch => request
                .body
                .as_ref()
                .and_then(Value::as_array)
                .and_then(|cmds| cmds.iter().map(tokens_of).collect())
                .unwrap_or_default(),
            TierKind::Envelope => request
                .body
                .as_ref()
                .and_then(|b| b.get("command"))
                .and_then(tokens_of)
                .into_iter()
                .collect(),
            TierKind::Path => vec![
                path.split('/')
                    .filter(|s| !s.is_empty())
                    .map(percent_decode)
                    .collect(),
            ],
        };
        if commands.is_empty() {
            return reply(400, json!({ "error": "bad request" }));
        }

        let blocked = commands.iter().any(|cmd| {
            cmd.first()
                .is_some_and(|v| self.failing_verbs.contains(&v.to_ascii_uppercase()))
        });
        if blocked {
            return reply(500, json!({ "error": "injected failure" }));
        }

        match tier {
            TierKind::Batch => reply(
                200,
                Value::Array(commands.iter().map(|c| self.run_wrapped(c)).collect()),
            ),
            _ => reply(200, self.run_wrapped(&commands[0])),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    NetworkFailure,
}

impl Reply {
    pub fn json(body: Value) -> Self {
        Reply::Status(200, body.to_string())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Reply::Status(status, body.into())
    }

    pub fn network_failure() -> Self {
        Reply::NetworkFailure
    }
}

/// Replays queued replies per `(method, path)`. The last queued reply for a
/// route repeats; unknown routes get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: Method, path: &str, reply: Reply) {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_to(&self, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|r| r.path() == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let key = (request.method, request.path());
        lock(&self.requests).push(request);

        let next = {
            let mut routes = lock(&self.routes);
            routes.get_mut(&key).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };

        match next {
            Some(Reply::Status(status, body)) => Ok(HttpResponse { status, body }),
            Some(Reply::NetworkFailure) => Err(Error::Transient("connection reset".into())),
            None => Ok(HttpResponse {
                status: 404,
                body: format!("no route for {:?} {}", key.0, key.1),
            }),
        }
    }
}
