use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Timeout, connection reset, unreadable body.
    #[error("network error: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The peer answered, but not in the shape we expect.
    #[error("unexpected response shape: {0}")]
    ProtocolMismatch(String),

    #[error("http {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("insufficient history: have {have} points, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("malformed price point {0:?}")]
    MalformedData(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::HttpStatus { status, .. } if (500..600).contains(status))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
