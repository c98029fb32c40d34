use thiserror::Error;

/// Channel-level error taxonomy. Every failure the relay can surface to
/// a caller is one of these.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The upstream rejected the key itself; the key gets disabled but
    /// the attempt is not retried.
    #[error("invalid api key: {0}")]
    InvalidKey(String),
    /// Every usable key was tried and marked; distinct from a plain
    /// rate-limit so callers can tell the channel is drained.
    #[error("all api keys exhausted")]
    KeysExhausted,
    #[error("sensitive content detected after {retries} retries")]
    SensitiveContent { retries: u32 },
    #[error("upstream returned status {status}")]
    Upstream { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("request canceled by client")]
    Canceled,
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// The HTTP status a front-end handler should answer with.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::Serde(_) => 400,
            Self::InvalidKey(_) => 401,
            Self::KeysExhausted => 503,
            Self::SensitiveContent { .. } => 502,
            Self::Upstream { status, .. } => *status,
            Self::Network(_) | Self::Io(_) => 502,
            Self::Timeout(_) => 504,
            Self::Canceled => 499,
        }
    }
}
