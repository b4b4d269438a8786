//! Error taxonomy for the market data core.
//!
//! Every fallible operation returns a closed error kind so callers can
//! distinguish retryable transport faults from validation failures and
//! skip-this-cycle conditions.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    /// Transient network failure, surfaced after retries are exhausted.
    #[error("network error after {attempts} attempt(s): {source}")]
    Network {
        #[source]
        source: reqwest::Error,
        attempts: u32,
    },

    /// HTTP 429. The mandatory cool-down has already been observed; the
    /// caller's next cycle retries naturally.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Non-retryable HTTP failure (status >= 400, except 429).
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// Response body that could not be decoded into the expected shape.
    #[error("malformed response: {context}")]
    MalformedResponse { context: String },

    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// Fewer fresh venues than consolidation/arbitrage requires. The
    /// current scan cycle is skipped; never fatal.
    #[error("insufficient fresh data for {symbol}: {fresh} fresh source(s)")]
    InsufficientData { symbol: String, fresh: usize },

    #[error("no session for owner {0}")]
    SessionNotFound(i64),
}

impl MarketError {
    /// True for faults a caller's periodic loop should simply retry on
    /// its next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketError::Network { .. } | MarketError::RateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let err = MarketError::RateLimited {
            retry_after: Duration::from_secs(60),
        };
        assert!(err.is_retryable());

        let err = MarketError::Api {
            status: 404,
            body: "not found".to_string(),
        };
        assert!(!err.is_retryable());

        let err = MarketError::UnsupportedExchange("kraken".to_string());
        assert!(!err.is_retryable());
    }
}
