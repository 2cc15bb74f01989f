//! HTTP client for the live room-query endpoint.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::error::CrawlError;
use super::proxy::ProxyPool;
use super::session::SessionToken;
use super::types::{parse_rooms, RoomQuery};

/// Answers "which rooms match this prefix and are free at (week, day, section)".
#[async_trait]
pub trait RoomCrawler: Send + Sync {
    async fn query_rooms(
        &self,
        token: &SessionToken,
        query: &RoomQuery,
    ) -> Result<Vec<String>, CrawlError>;
}

/// Configuration for the room crawler.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Full URL of the room-query endpoint
    pub room_query_url: String,
    /// Upper bound for a single request
    pub request_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl CrawlerConfig {
    pub fn new(room_query_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            room_query_url: room_query_url.into(),
            request_timeout,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

pub struct HttpRoomCrawler {
    client: Client,
    config: CrawlerConfig,
    proxies: Option<Arc<ProxyPool>>,
}

impl HttpRoomCrawler {
    pub fn new(config: CrawlerConfig) -> Result<Self, CrawlError> {
        url::Url::parse(&config.room_query_url)?;
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CrawlError::Network {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            proxies: None,
        })
    }

    /// Routes requests through `pool`, falling back to a direct connection
    /// whenever the pool is empty.
    pub fn with_proxies(mut self, pool: Arc<ProxyPool>) -> Self {
        self.proxies = Some(pool);
        self
    }

    fn client(&self) -> Client {
        self.proxies
            .as_ref()
            .and_then(|pool| pool.next_client())
            .unwrap_or_else(|| self.client.clone())
    }
}

#[async_trait]
impl RoomCrawler for HttpRoomCrawler {
    async fn query_rooms(
        &self,
        token: &SessionToken,
        query: &RoomQuery,
    ) -> Result<Vec<String>, CrawlError> {
        let form = query.form()?;
        let start = Instant::now();

        let response = self
            .client()
            .post(&self.config.room_query_url)
            .header(COOKIE, token.cookie_header())
            .form(&form)
            .send()
            .await?;

        check_session_valid(&response)?;

        if !response.status().is_success() {
            return Err(CrawlError::UnexpectedResponse {
                message: format!("room query returned status {}", response.status()),
            });
        }

        let body = response.text().await?;
        let rooms = parse_rooms(&body, &query.prefix)?;

        debug!(
            campus = ?query.campus,
            prefix = %query.prefix,
            week = query.week,
            day = query.day,
            section = query.section,
            rooms = rooms.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Room query finished"
        );
        Ok(rooms)
    }
}

/// Checks if the response indicates a valid session.
///
/// Returns an error if redirected to the login page.
fn check_session_valid(response: &reqwest::Response) -> Result<(), CrawlError> {
    let url = response.url().as_str();
    if is_login_url(url) {
        warn!(url = %url, "Session expired - redirected to login");
        return Err(CrawlError::SessionExpired {
            redirect_url: url.to_string(),
        });
    }
    Ok(())
}

fn is_login_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    ["/login", "login?", "login_slogin", "cas/login", "sso", "authserver"]
        .iter()
        .any(|indicator| lower.contains(indicator))
}
