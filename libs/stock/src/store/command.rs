use serde::Serialize;

const READ_VERBS: &[&str] = &[
    "PING", "GET", "MGET", "EXISTS", "TTL", "HGET", "HGETALL", "LLEN", "LRANGE", "LINDEX",
];

/// A single store operation: verb followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Command(Vec<String>);

impl Command {
    pub fn new(verb: &str) -> Self {
        Self(vec![verb.to_ascii_uppercase()])
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.0.push(arg.to_string());
        self
    }

    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        self.0.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    pub fn verb(&self) -> &str {
        &self.0[0]
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_read(&self) -> bool {
        READ_VERBS.contains(&self.verb())
    }

    pub fn ping() -> Self {
        Self::new("PING")
    }

    pub fn get(key: &str) -> Self {
        Self::new("GET").arg(key)
    }

    pub fn set_ex(key: &str, value: &str, ttl_secs: u64) -> Self {
        Self::new("SET").arg(key).arg(value).arg("EX").arg(ttl_secs)
    }

    pub fn del(key: &str) -> Self {
        Self::new("DEL").arg(key)
    }

    pub fn expire(key: &str, ttl_secs: u64) -> Self {
        Self::new("EXPIRE").arg(key).arg(ttl_secs)
    }

    pub fn hset<'a>(key: &str, fields: impl IntoIterator<Item = (&'a str, String)>) -> Self {
        fields
            .into_iter()
            .fold(Self::new("HSET").arg(key), |cmd, (f, v)| cmd.arg(f).arg(v))
    }

    pub fn hgetall(key: &str) -> Self {
        Self::new("HGETALL").arg(key)
    }

    /// Each value lands at the head in turn, so the last one ends up first.
    pub fn lpush<I, T>(key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToString,
    {
        Self::new("LPUSH").arg(key).args(values)
    }

    pub fn ltrim(key: &str, start: i64, stop: i64) -> Self {
        Self::new("LTRIM").arg(key).arg(start).arg(stop)
    }

    pub fn llen(key: &str) -> Self {
        Self::new("LLEN").arg(key)
    }

    pub fn lrange(key: &str, start: i64, stop: i64) -> Self {
        Self::new("LRANGE").arg(key).arg(start).arg(stop)
    }
}
