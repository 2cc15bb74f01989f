//! Weekly cache warmer.
//!
//! Sweeps every campus/day/section for one week through the live crawler and
//! stores the results as one warm-cache set. The sweep runs under a long-held
//! lock per (year, semester, week); a second caller while the lock is live
//! returns immediately.

mod queue;

pub use queue::{CompletionHook, WarmQueue, WarmQueueStats, WarmRequest};

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coord::{keys, try_lock, CoordError, LockService, WarmCache};
use crate::crawler::{Campus, CrawlError, RoomCrawler, RoomQuery, SessionError, SessionToken, SessionTokenSource};
use crate::occupancy::WeekMask;
use crate::schedule::MAX_SECTION;

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("Week {week} is outside the academic calendar")]
    InvalidWeek { week: u8 },

    #[error("Session token unavailable: {0}")]
    Session(#[from] SessionError),

    #[error("Coordination backend failed: {0}")]
    Coord(#[from] CoordError),

    #[error("Room query failed: {0}")]
    Crawl(#[from] CrawlError),

    #[error("Sweep collected nothing ({failed} queries failed)")]
    NothingCollected { failed: usize },
}

#[derive(Debug, Clone)]
pub struct WarmerConfig {
    /// Sleep between consecutive room queries
    pub pause: Duration,
    /// How long a finished sweep keeps other warmers away
    pub lock_ttl: Duration,
    pub cache_ttl: Duration,
    /// Token refreshes allowed for one query before it is given up
    pub token_retries: u32,
    /// Extra attempts for a query that failed on a transient network error
    pub transient_retries: u32,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            pause: Duration::from_millis(200),
            lock_ttl: Duration::from_secs(6 * 60 * 60),
            cache_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            token_retries: 2,
            transient_retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmStatus {
    Completed,
    /// Another warmer holds the week's lock.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub year: String,
    pub semester: String,
    pub week: u8,
    pub status: WarmStatus,
    pub entries: usize,
    pub failed_queries: usize,
}

impl WarmReport {
    fn new(year: &str, semester: &str, week: u8, status: WarmStatus) -> Self {
        Self {
            year: year.to_string(),
            semester: semester.to_string(),
            week,
            status,
            entries: 0,
            failed_queries: 0,
        }
    }

    pub fn failed(request: &WarmRequest, reason: String) -> Self {
        Self::new(
            &request.year,
            &request.semester,
            request.week,
            WarmStatus::Failed { reason },
        )
    }
}

/// `"{campus}-{day}-{section}:"`, the key part of a warm entry. The trailing
/// colon keeps section 1 from matching section 10.
pub fn warm_entry_prefix(campus: Campus, day: u8, section: u8) -> String {
    format!("{}-{}-{}:", campus.id(), day, section)
}

pub fn warm_entry(campus: Campus, day: u8, section: u8, rooms: &[String]) -> String {
    format!(
        "{}{}",
        warm_entry_prefix(campus, day, section),
        serde_json::json!(rooms)
    )
}

/// Room list stored for one (campus, day, section), if any.
pub fn lookup_warm_rooms(
    entries: &HashSet<String>,
    campus: Campus,
    day: u8,
    section: u8,
) -> Option<Vec<String>> {
    let prefix = warm_entry_prefix(campus, day, section);
    entries
        .iter()
        .find_map(|entry| entry.strip_prefix(prefix.as_str()))
        .and_then(|rooms| serde_json::from_str(rooms).ok())
}

pub struct CacheWarmer {
    crawler: Arc<dyn RoomCrawler>,
    tokens: Arc<dyn SessionTokenSource>,
    locks: Arc<dyn LockService>,
    cache: Arc<dyn WarmCache>,
    config: WarmerConfig,
}

impl CacheWarmer {
    pub fn new(
        crawler: Arc<dyn RoomCrawler>,
        tokens: Arc<dyn SessionTokenSource>,
        locks: Arc<dyn LockService>,
        cache: Arc<dyn WarmCache>,
        config: WarmerConfig,
    ) -> Self {
        Self {
            crawler,
            tokens,
            locks,
            cache,
            config,
        }
    }

    /// Warms (year, semester, week) using `student_id`'s session.
    pub async fn warm_week(
        &self,
        year: &str,
        semester: &str,
        week: u8,
        student_id: &str,
    ) -> Result<WarmReport, WarmError> {
        if WeekMask::single(week).is_none() {
            return Err(WarmError::InvalidWeek { week });
        }

        let lock_name = keys::warm_lock(year, semester, week);
        let Some(guard) = try_lock(&self.locks, &lock_name, self.config.lock_ttl).await? else {
            debug!(year = %year, semester = %semester, week, "Warm sweep already owned elsewhere");
            return Ok(WarmReport::new(year, semester, week, WarmStatus::Skipped));
        };

        let start = Instant::now();
        match self.sweep(year, semester, week, student_id).await {
            Ok(report) => {
                info!(
                    year = %year,
                    semester = %semester,
                    week,
                    entries = report.entries,
                    failed_queries = report.failed_queries,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Warm sweep finished"
                );
                guard.keep();
                Ok(report)
            }
            Err(e) => {
                warn!(year = %year, semester = %semester, week, error = %e, "Warm sweep failed");
                if let Err(release_err) = guard.release().await {
                    warn!(error = %release_err, "Failed to release warm lock");
                }
                Err(e)
            }
        }
    }

    async fn sweep(
        &self,
        year: &str,
        semester: &str,
        week: u8,
        student_id: &str,
    ) -> Result<WarmReport, WarmError> {
        let mut entries = Vec::new();
        let mut failed = 0;

        for campus in Campus::ALL {
            for day in 1..=7u8 {
                // Tokens degrade under sustained querying, so each day starts fresh.
                let mut token = self.tokens.get_session_token(student_id).await?;

                for section in 1..=MAX_SECTION {
                    let query = RoomQuery {
                        year: year.to_string(),
                        semester: semester.to_string(),
                        campus,
                        prefix: String::new(),
                        week,
                        day,
                        section,
                    };

                    match self.query_with_refresh(&mut token, student_id, &query).await {
                        Ok(rooms) => entries.push(warm_entry(campus, day, section, &rooms)),
                        Err(WarmError::Crawl(e)) => {
                            failed += 1;
                            warn!(campus = ?campus, day, section, error = %e, "Warm query failed");
                        }
                        Err(e) => return Err(e),
                    }

                    if !self.config.pause.is_zero() {
                        tokio::time::sleep(self.config.pause).await;
                    }
                }
            }
        }

        if entries.is_empty() {
            return Err(WarmError::NothingCollected { failed });
        }

        self.cache
            .store_warm_entries(
                &keys::warm_cache(year, semester, week),
                &entries,
                self.config.cache_ttl,
            )
            .await?;

        let mut report = WarmReport::new(year, semester, week, WarmStatus::Completed);
        report.entries = entries.len();
        report.failed_queries = failed;
        Ok(report)
    }

    /// One room query, refreshing the token and retrying when the upstream
    /// says the session is gone.
    async fn query_with_refresh(
        &self,
        token: &mut SessionToken,
        student_id: &str,
        query: &RoomQuery,
    ) -> Result<Vec<String>, WarmError> {
        let mut refreshes = 0;
        let mut retries = 0;
        loop {
            match self.crawler.query_rooms(token, query).await {
                Ok(rooms) => return Ok(rooms),
                Err(e) if e.needs_reauth() && refreshes < self.config.token_retries => {
                    refreshes += 1;
                    debug!(day = query.day, section = query.section, refreshes, "Refreshing session token");
                    *token = self.tokens.get_session_token(student_id).await?;
                }
                Err(e) if e.is_retryable() && retries < self.config.transient_retries => {
                    retries += 1;
                    debug!(day = query.day, section = query.section, error = %e, "Retrying room query");
                    tokio::time::sleep(self.config.pause).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
