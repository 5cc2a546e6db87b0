use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path component of the url, without query.
    pub fn path(&self) -> String {
        reqwest::Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with `HttpStatus` on a non-2xx status, otherwise parses the body.
    pub fn into_json(self) -> Result<Value> {
        if !self.is_success() {
            return Err(Error::HttpStatus {
                status: self.status,
                body: truncate(&self.body, 300),
            });
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// One blocking round trip. Implementations never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("stock/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        }
        .timeout(request.timeout)
        .header("accept", "application/json");

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let res = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Transient(format!("timeout: {e}"))
            } else if e.is_connect() {
                Error::Transient(format!("connect: {e}"))
            } else {
                Error::Transient(e.to_string())
            }
        })?;

        let status = res.status().as_u16();
        let body = res
            .text()
            .await
            .map_err(|e| Error::Transient(format!("read body: {e}")))?;

        Ok(HttpResponse { status, body })
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_sets_authorization_header() {
        let req = HttpRequest::new(Method::Get, "https://store.test/PING", Duration::from_secs(1))
            .bearer("tok");

        assert_eq!(
            req.headers,
            vec![("authorization".to_string(), "Bearer tok".to_string())]
        );
        assert_eq!(req.path(), "/PING");
    }

    #[test]
    fn non_success_status_becomes_http_error() {
        let res = HttpResponse {
            status: 502,
            body: "bad gateway".into(),
        };
        let err = res.into_json().unwrap_err();

        assert!(err.is_server_error());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("1분당 1회", 3), "1분당");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
