/// Error taxonomy shared by every stage of the ingestion and query pipeline.
///
/// Each variant corresponds to one of the propagation rules in the design's
/// failure-semantics table: row errors never abort an archive, archive
/// errors never abort a request, transport/store errors abort the current
/// request and rely on idempotent retry.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GaplessError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("source unavailable at {url}: HTTP {status}")]
    SourceUnavailable { url: String, status: u16 },

    #[error("transport error for {url} after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("rate limited by {url}, retry-after {retry_after:?}")]
    RateLimited {
        url: String,
        retry_after: std::time::Duration,
    },

    #[error("decode failure for {archive}: {reason}")]
    DecodeFailure { archive: String, reason: String },

    #[error("invariant violation on row {row_index}: {reason}")]
    InvariantViolation { row_index: usize, reason: String },

    #[error("store failure: {0}")]
    StoreFailure(String),
}

pub type Result<T> = std::result::Result<T, GaplessError>;

impl From<rusqlite::Error> for GaplessError {
    fn from(err: rusqlite::Error) -> Self {
        GaplessError::StoreFailure(err.to_string())
    }
}

impl From<reqwest::Error> for GaplessError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        GaplessError::Transport {
            url,
            attempts: 1,
            source: Box::new(err),
        }
    }
}
