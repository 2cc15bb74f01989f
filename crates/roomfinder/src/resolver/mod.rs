//! Free-room resolution.
//!
//! Tries the warm cache, then a live crawl, then the persisted index. Each
//! tier runs under its own timeout and either answers every requested
//! section or defers wholly to the next tier, so one answer never mixes
//! sources.

mod types;

pub use types::*;

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coord::{keys, CoordError, WarmCache};
use crate::crawler::{Campus, CrawlError, RoomCrawler, RoomQuery, SessionError, SessionTokenSource};
use crate::db::{IndexError, OccupancyIndex, OccupancyQuery};
use crate::util::generate_correlation_id;
use crate::warmer::{lookup_warm_rooms, WarmQueue, WarmRequest};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub warm_timeout: Duration,
    pub live_timeout: Duration,
    pub index_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            warm_timeout: Duration::from_secs(2),
            live_timeout: Duration::from_secs(20),
            index_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a tier deferred.
#[derive(Debug, Error)]
enum TierError {
    #[error("{what}")]
    Miss { what: String },

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct AvailabilityResolver {
    cache: Arc<dyn WarmCache>,
    crawler: Arc<dyn RoomCrawler>,
    tokens: Arc<dyn SessionTokenSource>,
    index: Arc<dyn OccupancyIndex>,
    warm_queue: Option<Arc<WarmQueue>>,
    config: ResolverConfig,
}

impl AvailabilityResolver {
    pub fn new(
        cache: Arc<dyn WarmCache>,
        crawler: Arc<dyn RoomCrawler>,
        tokens: Arc<dyn SessionTokenSource>,
        index: Arc<dyn OccupancyIndex>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            cache,
            crawler,
            tokens,
            index,
            warm_queue: None,
            config,
        }
    }

    /// Successful live crawls submit a warm sweep for the queried week here.
    pub fn with_warm_queue(mut self, queue: Arc<WarmQueue>) -> Self {
        self.warm_queue = Some(queue);
        self
    }

    pub async fn find_free(&self, query: &FreeRoomQuery) -> Result<FreeRoomAnswer, ResolveError> {
        let query = &query.normalized()?;

        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        debug!(
            correlation_id = %correlation_id,
            year = %query.year,
            semester = %query.semester,
            week = query.week,
            day = query.day,
            sections = ?query.sections,
            prefix = %query.prefix,
            "Resolving free rooms"
        );

        let mut reasons = Vec::new();
        let tiers = [Provenance::WarmCache, Provenance::LiveCrawl, Provenance::Index];
        for tier in tiers {
            let outcome = match tier {
                Provenance::WarmCache => {
                    self.run_tier(tier, self.config.warm_timeout, &correlation_id, self.from_warm_cache(query))
                        .await
                }
                Provenance::LiveCrawl => {
                    self.run_tier(tier, self.config.live_timeout, &correlation_id, self.from_live_crawl(query))
                        .await
                }
                Provenance::Index => {
                    self.run_tier(tier, self.config.index_timeout, &correlation_id, self.from_index(query))
                        .await
                }
            };

            match outcome {
                Ok(answer) => {
                    info!(
                        correlation_id = %correlation_id,
                        source = tier.as_str(),
                        rooms = answer.rows.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Resolved free rooms"
                    );
                    return Ok(answer);
                }
                Err(reason) => reasons.push(reason),
            }
        }

        warn!(
            correlation_id = %correlation_id,
            reasons = ?reasons,
            "Every tier failed"
        );
        Err(ResolveError::SearchFailed { reasons })
    }

    async fn run_tier<F>(
        &self,
        tier: Provenance,
        limit: Duration,
        correlation_id: &str,
        attempt: F,
    ) -> Result<FreeRoomAnswer, String>
    where
        F: Future<Output = Result<FreeRoomAnswer, TierError>>,
    {
        match tokio::time::timeout(limit, attempt).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(TierError::Miss { what })) => {
                debug!(correlation_id = %correlation_id, tier = tier.as_str(), "Tier missed: {}", what);
                Err(format!("{}: {}", tier.as_str(), what))
            }
            Ok(Err(e)) => {
                warn!(correlation_id = %correlation_id, tier = tier.as_str(), error = %e, "Tier failed");
                Err(format!("{}: {}", tier.as_str(), e))
            }
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    tier = tier.as_str(),
                    timeout_ms = limit.as_millis() as u64,
                    "Tier timed out"
                );
                Err(format!("{}: timed out after {}ms", tier.as_str(), limit.as_millis()))
            }
        }
    }

    async fn from_warm_cache(&self, query: &FreeRoomQuery) -> Result<FreeRoomAnswer, TierError> {
        let key = keys::warm_cache(&query.year, &query.semester, query.week);
        let Some(entries) = self.cache.warm_entries(&key).await? else {
            return Err(TierError::Miss {
                what: format!("week {} is not warmed", query.week),
            });
        };

        let campus = Campus::from_prefix(&query.prefix);
        let mut free = Vec::with_capacity(query.sections.len());
        for &section in &query.sections {
            let rooms = lookup_warm_rooms(&entries, campus, query.day, section).ok_or_else(|| {
                TierError::Miss {
                    what: format!("day {} section {} is not warmed", query.day, section),
                }
            })?;
            free.push(
                rooms
                    .into_iter()
                    .filter(|room| room.starts_with(&query.prefix))
                    .collect::<BTreeSet<_>>(),
            );
        }

        Ok(FreeRoomAnswer::from_free_lists(
            Provenance::WarmCache,
            &query.sections,
            free,
        ))
    }

    async fn from_live_crawl(&self, query: &FreeRoomQuery) -> Result<FreeRoomAnswer, TierError> {
        let token = self.tokens.get_session_token(&query.student_id).await?;
        let token = &token;
        let campus = Campus::from_prefix(&query.prefix);

        let lookups = query.sections.iter().map(move |&section| {
            let room_query = RoomQuery {
                year: query.year.clone(),
                semester: query.semester.clone(),
                campus,
                prefix: query.prefix.clone(),
                week: query.week,
                day: query.day,
                section,
            };
            async move { self.crawler.query_rooms(token, &room_query).await }
        });
        let lists = try_join_all(lookups).await?;

        if let Some(queue) = self.warm_queue.as_ref() {
            let queued = queue.submit(WarmRequest {
                year: query.year.clone(),
                semester: query.semester.clone(),
                week: query.week,
                student_id: query.student_id.clone(),
            });
            debug!(week = query.week, queued, "Requested warm sweep after live crawl");
        }

        let free = lists
            .into_iter()
            .map(|rooms| rooms.into_iter().collect::<BTreeSet<_>>())
            .collect();
        Ok(FreeRoomAnswer::from_free_lists(
            Provenance::LiveCrawl,
            &query.sections,
            free,
        ))
    }

    async fn from_index(&self, query: &FreeRoomQuery) -> Result<FreeRoomAnswer, TierError> {
        let catalog = self.index.catalog(&query.prefix).await?;
        if catalog.is_empty() {
            return Err(TierError::Miss {
                what: format!("no catalogued rooms start with {:?}", query.prefix),
            });
        }

        let lookups = query.sections.iter().map(move |&section| {
            let occupancy = OccupancyQuery {
                year: query.year.clone(),
                semester: query.semester.clone(),
                week: query.week,
                day: query.day,
                section,
                prefix: query.prefix.clone(),
            };
            async move { self.index.occupied_rooms(&occupancy).await }
        });
        let occupied = try_join_all(lookups).await?;

        Ok(FreeRoomAnswer::from_catalog(&query.sections, catalog, &occupied))
    }
}
