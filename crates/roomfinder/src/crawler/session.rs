//! Session tokens for the course-selection system.
//!
//! Tokens are issued by the cookie server (the headless-login helper that
//! sits next to this service) and are consumed opaquely.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::util::short_digest;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to reach cookie server: {message}")]
    Network { message: String },

    #[error("Cookie server rejected request for {student_id} with status {status}")]
    Rejected { student_id: String, status: u16 },

    #[error("Cookie server returned an empty token for {student_id}")]
    Empty { student_id: String },

    #[error("Invalid cookie server URL: {message}")]
    UrlError { message: String },
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Network {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        SessionError::UrlError {
            message: err.to_string(),
        }
    }
}

/// An opaque `JSESSIONID` value.
///
/// `Display` and `Debug` only show a short fingerprint so tokens never reach
/// the logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token, for the cookie header only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn cookie_header(&self) -> String {
        format!("JSESSIONID={}", self.0)
    }

    pub fn fingerprint(&self) -> String {
        short_digest(&[&self.0], 4)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...", self.fingerprint())
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionToken").field(&self.fingerprint()).finish()
    }
}

/// `getSessionToken(studentId)`. Tokens are short-lived; callers that make
/// many requests should ask again rather than cache.
#[async_trait]
pub trait SessionTokenSource: Send + Sync {
    async fn get_session_token(&self, student_id: &str) -> Result<SessionToken, SessionError>;
}

/// Fetches tokens from `GET {base}/cookie/{student_id}`.
pub struct CookieServerTokenSource {
    client: Client,
    base_url: Url,
}

impl CookieServerTokenSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SessionError> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn cookie_url(&self, student_id: &str) -> Result<Url, SessionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SessionError::UrlError {
                message: "cookie server URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push("cookie")
            .push(student_id);
        Ok(url)
    }
}

#[async_trait]
impl SessionTokenSource for CookieServerTokenSource {
    async fn get_session_token(&self, student_id: &str) -> Result<SessionToken, SessionError> {
        let url = self.cookie_url(student_id)?;
        debug!(student_id = %student_id, "Requesting session token from cookie server");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::Rejected {
                student_id: student_id.to_string(),
                status: response.status().as_u16(),
            });
        }

        let text = response.text().await?;
        let token = extract_token(&text).ok_or_else(|| SessionError::Empty {
            student_id: student_id.to_string(),
        })?;

        info!(student_id = %student_id, token = %token, "Obtained session token");
        Ok(token)
    }
}

/// Accepts either a bare token or a `JSESSIONID=...; Path=/` cookie string.
fn extract_token(body: &str) -> Option<SessionToken> {
    let body = body.trim();
    let value = body
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("JSESSIONID="))
        .unwrap_or(body)
        .trim();

    if value.is_empty() || value.contains(char::is_whitespace) {
        None
    } else {
        Some(SessionToken::new(value))
    }
}
