//! Ingestion of the enrollment roster into the occupancy index.
//!
//! Pages are claimed one at a time with a single-attempt lock. A page whose
//! lock is held elsewhere is left to its owner; a page whose marker says
//! finished is not rewritten. Writes are upserts by deterministic document
//! id, so the whole run can be repeated from scratch.

mod upload;

pub use upload::{import_sheets, parse_sidecar, ImportError, ImportReport, SheetColumns, UploadedSheet};

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::coord::{keys, try_lock, CoordError, LockService, TaskMarkers, TaskState};
use crate::db::{EnrollmentSource, FailedDoc, IndexError, OccupancyIndex};
use crate::occupancy::{to_occupancy, EnrollmentRecord};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Enrollment source failed on page {page}: {source}")]
    Source { page: u32, source: IndexError },

    #[error("Bulk write failed on page {page}: {source}")]
    Index { page: u32, source: IndexError },

    #[error("Clearing other terms failed: {0}")]
    Clear(#[source] IndexError),

    #[error("Coordination backend failed: {0}")]
    Coord(#[from] CoordError),

    #[error("Page {page} partially written: {} documents failed", failed.len())]
    PartialWrite { page: u32, failed: Vec<FailedDoc> },
}

#[derive(Debug, Clone)]
pub struct ReindexConfig {
    pub page_size: u32,
    /// Upper bound on how long one page may stay claimed
    pub lock_ttl: Duration,
    /// How long a page's Finished/Failed marker suppresses rework
    pub marker_ttl: Duration,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            lock_ttl: Duration::from_secs(10 * 60),
            marker_ttl: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub year: String,
    pub semester: String,
    pub pages: u32,
    pub pages_written: u32,
    /// Pages whose marker already said finished
    pub pages_already_done: u32,
    /// Pages claimed by another worker
    pub pages_contended: u32,
    pub documents_written: usize,
    /// Enrollment rows the codec could not convert
    pub records_rejected: usize,
}

pub struct Reindexer {
    source: Arc<dyn EnrollmentSource>,
    index: Arc<dyn OccupancyIndex>,
    locks: Arc<dyn LockService>,
    markers: Arc<dyn TaskMarkers>,
    config: ReindexConfig,
}

impl Reindexer {
    pub fn new(
        source: Arc<dyn EnrollmentSource>,
        index: Arc<dyn OccupancyIndex>,
        locks: Arc<dyn LockService>,
        markers: Arc<dyn TaskMarkers>,
        config: ReindexConfig,
    ) -> Self {
        Self {
            source,
            index,
            locks,
            markers,
            config,
        }
    }

    /// Rebuilds the index for (year, semester). The first failing page aborts
    /// the run; pages committed before it stay committed.
    pub async fn reindex(&self, year: &str, semester: &str) -> Result<ReindexReport, IngestError> {
        let start = Instant::now();
        let mut report = ReindexReport {
            year: year.to_string(),
            semester: semester.to_string(),
            ..ReindexReport::default()
        };

        let page_size = self.config.page_size.max(1);
        let mut page = 1u32;
        loop {
            let batch = self
                .source
                .get_batch(year, semester, page, page_size)
                .await
                .map_err(|source| IngestError::Source { page, source })?;
            if batch.records.is_empty() {
                break;
            }

            report.pages += 1;
            self.process_page(year, semester, page, &batch.records, &mut report)
                .await?;

            if u64::from(page) * u64::from(page_size) >= batch.total {
                break;
            }
            page += 1;
        }

        info!(
            year = %year,
            semester = %semester,
            pages = report.pages,
            written = report.pages_written,
            already_done = report.pages_already_done,
            contended = report.pages_contended,
            documents = report.documents_written,
            rejected = report.records_rejected,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reindex finished"
        );
        Ok(report)
    }

    /// Deletes index documents of every term except (year, semester).
    pub async fn clear_other_terms(&self, year: &str, semester: &str) -> Result<usize, IngestError> {
        self.index
            .delete_other_terms(year, semester)
            .await
            .map_err(IngestError::Clear)
    }

    async fn process_page(
        &self,
        year: &str,
        semester: &str,
        page: u32,
        records: &[EnrollmentRecord],
        report: &mut ReindexReport,
    ) -> Result<(), IngestError> {
        let lock_name = keys::reindex_lock(year, semester, page);
        let Some(guard) = try_lock(&self.locks, &lock_name, self.config.lock_ttl).await? else {
            debug!(page, "Page claimed by another worker, advancing");
            report.pages_contended += 1;
            return Ok(());
        };

        let result = self
            .write_page(year, semester, page, &lock_name, records, report)
            .await;

        if let Err(e) = guard.release().await {
            warn!(page, error = %e, "Failed to release page lock");
        }
        result
    }

    async fn write_page(
        &self,
        year: &str,
        semester: &str,
        page: u32,
        lock_name: &str,
        records: &[EnrollmentRecord],
        report: &mut ReindexReport,
    ) -> Result<(), IngestError> {
        let marker = keys::task_marker(year, semester, lock_name);
        if self.markers.get_marker(&marker).await? == Some(TaskState::Finished) {
            debug!(page, "Page already finished");
            report.pages_already_done += 1;
            return Ok(());
        }
        self.markers
            .set_marker(&marker, TaskState::InProgress, self.config.lock_ttl)
            .await?;

        let mut docs = Vec::with_capacity(records.len());
        for record in records {
            match to_occupancy(record) {
                Ok(doc) => docs.push(doc),
                Err(e) => {
                    report.records_rejected += 1;
                    warn!(page, error = %e, "Skipping enrollment row");
                }
            }
        }

        let outcome = match self.index.bulk_upsert(&docs).await {
            Ok(bulk) if bulk.is_clean() => {
                report.pages_written += 1;
                report.documents_written += bulk.written;
                debug!(page, documents = bulk.written, "Page written");
                Ok(())
            }
            Ok(bulk) => {
                report.documents_written += bulk.written;
                for failed in &bulk.failed {
                    error!(page, doc_id = %failed.doc_id, reason = %failed.reason, "Document write failed");
                }
                Err(IngestError::PartialWrite {
                    page,
                    failed: bulk.failed,
                })
            }
            Err(source) => Err(IngestError::Index { page, source }),
        };

        let state = if outcome.is_ok() {
            TaskState::Finished
        } else {
            TaskState::Failed
        };
        if let Err(e) = self
            .markers
            .set_marker(&marker, state, self.config.marker_ttl)
            .await
        {
            warn!(page, error = %e, "Failed to record page marker");
        }
        outcome
    }
}
