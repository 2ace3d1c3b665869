//! Error types for the payout monitor

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the payout monitor
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Transaction / reputation source errors
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Source request timed out: {0}")]
    SourceTimeout(String),

    #[error("Malformed source response: {0}")]
    MalformedResponse(String),

    #[error("Source rate limit reached: {0}")]
    SourceRateLimited(String),

    // Delivery errors
    #[error("Chat provider rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable(_)
                | Error::SourceTimeout(_)
                | Error::SourceRateLimited(_)
                | Error::RateLimited { .. }
        )
    }

    /// Check if this error came from the chat provider's rate limiter
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::SourceTimeout(e.to_string())
        } else if e.is_decode() {
            Error::MalformedResponse(e.to_string())
        } else {
            Error::SourceUnavailable(e.to_string())
        }
    }
}
