//! Background worker that runs warm sweeps submitted from request paths.
//!
//! `submit` never blocks and never reports warmer errors to the caller; they
//! go to the log, the counters and the optional completion hook instead.

use dashmap::DashSet;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{CacheWarmer, WarmReport, WarmStatus};

const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmRequest {
    pub year: String,
    pub semester: String,
    pub week: u8,
    pub student_id: String,
}

impl WarmRequest {
    fn key(&self) -> (String, String, u8) {
        (self.year.clone(), self.semester.clone(), self.week)
    }
}

/// Called with every finished (or failed) sweep.
pub type CompletionHook = Arc<dyn Fn(&WarmReport) + Send + Sync>;

#[derive(Default)]
struct Counters {
    pending: AtomicUsize,
    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmQueueStats {
    pub pending: usize,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Submissions dropped because the same week was already queued or running
    pub deduplicated: u64,
    /// Submissions dropped because the queue was full or shut down
    pub rejected: u64,
}

pub struct WarmQueue {
    tx: Mutex<Option<mpsc::Sender<WarmRequest>>>,
    in_flight: Arc<DashSet<(String, String, u8)>>,
    counters: Arc<Counters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WarmQueue {
    /// Spawns the worker on the current Tokio runtime.
    pub fn start(warmer: Arc<CacheWarmer>, hook: Option<CompletionHook>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let in_flight = Arc::new(DashSet::new());
        let counters = Arc::new(Counters::default());
        let handle = tokio::spawn(run_worker(
            rx,
            warmer,
            hook,
            Arc::clone(&in_flight),
            Arc::clone(&counters),
        ));

        Self {
            tx: Mutex::new(Some(tx)),
            in_flight,
            counters,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues a sweep. Returns false when it was dropped as a duplicate, the
    /// queue is full, or the queue has shut down.
    pub fn submit(&self, request: WarmRequest) -> bool {
        let key = request.key();
        if !self.in_flight.insert(key.clone()) {
            self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(year = %key.0, semester = %key.1, week = key.2, "Warm request already in flight");
            return false;
        }

        self.counters.pending.fetch_add(1, Ordering::Relaxed);
        let sent = match self.tx.lock() {
            Ok(tx) => tx
                .as_ref()
                .map(|tx| tx.try_send(request).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        };

        if !sent {
            self.counters.pending.fetch_sub(1, Ordering::Relaxed);
            self.in_flight.remove(&key);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(year = %key.0, semester = %key.1, week = key.2, "Warm request rejected");
        }
        sent
    }

    pub fn stats(&self) -> WarmQueueStats {
        WarmQueueStats {
            pending: self.counters.pending.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue and waits for everything already submitted to finish.
    pub async fn shutdown_and_drain(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Warm worker panicked");
            }
        }
        info!("Warm queue drained");
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<WarmRequest>,
    warmer: Arc<CacheWarmer>,
    hook: Option<CompletionHook>,
    in_flight: Arc<DashSet<(String, String, u8)>>,
    counters: Arc<Counters>,
) {
    while let Some(request) = rx.recv().await {
        counters.pending.fetch_sub(1, Ordering::Relaxed);

        let report = match warmer
            .warm_week(
                &request.year,
                &request.semester,
                request.week,
                &request.student_id,
            )
            .await
        {
            Ok(report) => report,
            Err(e) => {
                error!(
                    year = %request.year,
                    semester = %request.semester,
                    week = request.week,
                    error = %e,
                    "Background warm failed"
                );
                WarmReport::failed(&request, e.to_string())
            }
        };

        let counter = match report.status {
            WarmStatus::Completed => &counters.completed,
            WarmStatus::Skipped => &counters.skipped,
            WarmStatus::Failed { .. } => &counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        in_flight.remove(&request.key());

        if let Some(hook) = hook.as_ref() {
            hook(&report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{keys, LockService, MemoryCoordinator};
    use crate::fakes::{CountingTokenSource, ScriptedCrawler};
    use crate::warmer::WarmerConfig;
    use std::time::Duration;

    fn request(week: u8) -> WarmRequest {
        WarmRequest {
            year: "2024".to_string(),
            semester: "1".to_string(),
            week,
            student_id: "20210001".to_string(),
        }
    }

    fn queue_with_hook(
        crawler: Arc<ScriptedCrawler>,
        coordinator: Arc<MemoryCoordinator>,
    ) -> (WarmQueue, mpsc::UnboundedReceiver<WarmReport>) {
        let warmer = Arc::new(CacheWarmer::new(
            crawler,
            Arc::new(CountingTokenSource::new()),
            coordinator.clone(),
            coordinator,
            WarmerConfig {
                pause: Duration::ZERO,
                ..WarmerConfig::default()
            },
        ));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let hook: CompletionHook = Arc::new(move |report: &WarmReport| {
            let _ = done_tx.send(report.clone());
        });
        (WarmQueue::start(warmer, Some(hook)), done_rx)
    }

    #[tokio::test]
    async fn test_submitted_sweep_reports_through_hook() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let (queue, mut done) =
            queue_with_hook(Arc::new(ScriptedCrawler::with_rooms(&["n1101"])), coordinator);

        assert!(queue.submit(request(3)));
        let report = done.recv().await.unwrap();

        assert_eq!(report.week, 3);
        assert_eq!(report.status, WarmStatus::Completed);
        assert_eq!(queue.stats().completed, 1);
        assert_eq!(queue.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_dropped() {
        let crawler = Arc::new(ScriptedCrawler::with_rooms(&["n1101"]));
        let gate = crawler.gate();
        let coordinator = Arc::new(MemoryCoordinator::new());
        let (queue, mut done) = queue_with_hook(crawler, coordinator);

        assert!(queue.submit(request(4)));
        assert!(!queue.submit(request(4)));
        assert_eq!(queue.stats().deduplicated, 1);

        gate.add_permits(1_000);
        assert_eq!(done.recv().await.unwrap().status, WarmStatus::Completed);
        assert!(queue.submit(request(4)));
        assert_eq!(done.recv().await.unwrap().status, WarmStatus::Skipped);
    }

    #[tokio::test]
    async fn test_errors_are_counted_not_returned() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let (queue, mut done) = queue_with_hook(Arc::new(ScriptedCrawler::failing()), coordinator.clone());

        assert!(queue.submit(request(5)));
        let report = done.recv().await.unwrap();
        assert!(matches!(report.status, WarmStatus::Failed { .. }));
        assert_eq!(queue.stats().failed, 1);
        assert!(!coordinator.is_locked(&keys::warm_lock("2024", "1", 5)));

        // The worker keeps going after a failure.
        coordinator
            .acquire(&keys::warm_lock("2024", "1", 6), "other", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(queue.submit(request(6)));
        assert_eq!(done.recv().await.unwrap().status, WarmStatus::Skipped);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new_work() {
        let coordinator = Arc::new(MemoryCoordinator::new());
        let (queue, mut done) =
            queue_with_hook(Arc::new(ScriptedCrawler::with_rooms(&["n1101"])), coordinator);

        assert!(queue.submit(request(7)));
        assert!(queue.submit(request(8)));
        queue.shutdown_and_drain().await;

        assert_eq!(queue.stats().completed, 2);
        assert!(done.recv().await.is_some());
        assert!(done.recv().await.is_some());
        assert!(!queue.submit(request(9)));
        assert_eq!(queue.stats().rejected, 1);
    }
}
