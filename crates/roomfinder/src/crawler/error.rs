//! Error types for the upstream crawler.

use thiserror::Error;

/// Errors that can occur while talking to the course-selection system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrawlError {
    /// Network/HTTP request failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// The request did not finish within the configured timeout
    #[error("Upstream timed out: {message}")]
    Timeout { message: String },

    /// Token was rejected; the upstream bounced us to its login page or
    /// answered with something other than JSON
    #[error("Session expired, redirected to: {redirect_url}")]
    SessionExpired { redirect_url: String },

    /// Server returned an unexpected status or shape
    #[error("Unexpected response: {message}")]
    UnexpectedResponse { message: String },

    /// Failed to parse a JSON or HTML body
    #[error("Parse error: {message}")]
    ParseError { message: String },

    /// The query cannot be encoded (e.g. week outside 1..=30)
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// URL parsing/construction failed
    #[error("URL error: {message}")]
    UrlError { message: String },
}

impl CrawlError {
    /// Returns true if this error indicates the session token needs to be refreshed.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, CrawlError::SessionExpired { .. })
    }

    /// Returns true if this error is potentially transient and retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::Network { .. }
                | CrawlError::Timeout { .. }
                | CrawlError::UnexpectedResponse { .. }
        )
    }
}

impl From<reqwest::Error> for CrawlError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CrawlError::Timeout {
                message: err.to_string(),
            }
        } else {
            CrawlError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for CrawlError {
    fn from(err: url::ParseError) -> Self {
        CrawlError::UrlError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::ParseError {
            message: err.to_string(),
        }
    }
}
