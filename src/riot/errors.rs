//! Error types for the Riot API client.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("resource not found")]
    NotFound,
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("unknown platform routing value: {0}")]
    UnknownPlatform(String),
    #[error("Failed to parse response")]
    ParseFailed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl FetchError {
    /// Whether retrying the same request later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::Request(_) => true,
            FetchError::Status { status, .. } => *status >= 500,
            FetchError::NotFound | FetchError::UnknownPlatform(_) | FetchError::ParseFailed { .. } => {
                false
            }
        }
    }
}
