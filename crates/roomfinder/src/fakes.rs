//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::crawler::{
    CrawlError, RoomCrawler, RoomQuery, ScheduleEntry, ScheduleSource, SessionError, SessionToken,
    SessionTokenSource, StudentKind, Term,
};
use crate::db::{BulkReport, CampusDb, FailedDoc, IndexError, OccupancyIndex, OccupancyQuery};
use crate::occupancy::OccupancyRecord;

/// Room crawler answering from a fixed room list.
///
/// Every room is free unless marked busy for a section. Calls can be made to
/// fail, to report an expired session, to stall, or to wait on a gate.
pub struct ScriptedCrawler {
    rooms: Vec<String>,
    busy: Mutex<HashMap<u8, HashSet<String>>>,
    failing_sections: Mutex<HashSet<u8>>,
    fail_all: bool,
    stall: AtomicBool,
    expired_left: AtomicUsize,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedCrawler {
    pub fn with_rooms(rooms: &[&str]) -> Self {
        Self {
            rooms: rooms.iter().map(|r| r.to_string()).collect(),
            busy: Mutex::new(HashMap::new()),
            failing_sections: Mutex::new(HashSet::new()),
            fail_all: false,
            stall: AtomicBool::new(false),
            expired_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::with_rooms(&[])
        }
    }

    pub fn mark_busy(&self, section: u8, room: &str) {
        self.busy
            .lock()
            .unwrap()
            .entry(section)
            .or_default()
            .insert(room.to_string());
    }

    pub fn fail_section(&self, section: u8) {
        self.failing_sections.lock().unwrap().insert(section);
    }

    /// The next `count` calls report an expired session.
    pub fn expire_sessions(&self, count: usize) {
        self.expired_left.store(count, Ordering::SeqCst);
    }

    /// Every later call hangs for an hour.
    pub fn stall(&self) {
        self.stall.store(true, Ordering::SeqCst);
    }

    /// Calls wait for a permit from the returned semaphore.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomCrawler for ScriptedCrawler {
    async fn query_rooms(
        &self,
        _token: &SessionToken,
        query: &RoomQuery,
    ) -> Result<Vec<String>, CrawlError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let expired = self
            .expired_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if expired {
            return Err(CrawlError::SessionExpired {
                redirect_url: "https://sso.example.edu/login".to_string(),
            });
        }
        if self.fail_all || self.failing_sections.lock().unwrap().contains(&query.section) {
            return Err(CrawlError::Network {
                message: "connection reset".to_string(),
            });
        }

        let busy = self.busy.lock().unwrap();
        let busy = busy.get(&query.section);
        Ok(self
            .rooms
            .iter()
            .filter(|room| room.starts_with(&query.prefix))
            .filter(|room| busy.map_or(true, |b| !b.contains(*room)))
            .cloned()
            .collect())
    }
}

/// Hands out `token-1`, `token-2`, ... and counts them.
#[derive(Default)]
pub struct CountingTokenSource {
    issued: AtomicUsize,
    refuse: AtomicBool,
}

impl CountingTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        let source = Self::default();
        source.refuse.store(true, Ordering::SeqCst);
        source
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionTokenSource for CountingTokenSource {
    async fn get_session_token(&self, student_id: &str) -> Result<SessionToken, SessionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SessionError::Rejected {
                student_id: student_id.to_string(),
                status: 403,
            });
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionToken::new(format!("token-{n}")))
    }
}

/// [`CampusDb`] wrapper that counts bulk writes and can be told to fail.
pub struct FlakyIndex {
    pub inner: Arc<CampusDb>,
    writes: AtomicUsize,
    written_docs: AtomicUsize,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    reject_rooms: Mutex<HashSet<String>>,
    write_delay: Mutex<Duration>,
}

impl FlakyIndex {
    pub fn new(inner: Arc<CampusDb>) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            written_docs: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            reject_rooms: Mutex::new(HashSet::new()),
            write_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Documents for `room` come back as per-document failures.
    pub fn reject_room(&self, room: &str) {
        self.reject_rooms.lock().unwrap().insert(room.to_string());
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Number of bulk_upsert calls that reached the store.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn written_docs(&self) -> usize {
        self.written_docs.load(Ordering::SeqCst)
    }

    fn check_reads(&self) -> Result<(), IndexError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable {
                message: "index offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OccupancyIndex for FlakyIndex {
    async fn bulk_upsert(&self, docs: &[OccupancyRecord]) -> Result<BulkReport, IndexError> {
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IndexError::Unavailable {
                message: "bulk endpoint unreachable".to_string(),
            });
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        let rejected_rooms = self.reject_rooms.lock().unwrap().clone();
        let (rejected, accepted): (Vec<_>, Vec<_>) = docs
            .iter()
            .cloned()
            .partition(|doc| rejected_rooms.contains(&doc.room));

        let mut report = self.inner.bulk_upsert(&accepted).await?;
        self.written_docs.fetch_add(report.written, Ordering::SeqCst);
        report.failed.extend(rejected.iter().map(|doc| FailedDoc {
            doc_id: doc.doc_id(),
            reason: "mapper_parsing_exception".to_string(),
        }));
        Ok(report)
    }

    async fn delete_other_terms(&self, year: &str, semester: &str) -> Result<usize, IndexError> {
        self.inner.delete_other_terms(year, semester).await
    }

    async fn count_term(&self, year: &str, semester: &str) -> Result<usize, IndexError> {
        self.inner.count_term(year, semester).await
    }

    async fn occupied_rooms(&self, query: &OccupancyQuery) -> Result<BTreeSet<String>, IndexError> {
        self.check_reads()?;
        self.inner.occupied_rooms(query).await
    }

    async fn catalog(&self, prefix: &str) -> Result<Vec<String>, IndexError> {
        self.check_reads()?;
        self.inner.catalog(prefix).await
    }
}

/// Serves one fixed timetable to graduate students and an expired session
/// to everyone else.
pub struct FixedSchedules {
    entries: Vec<ScheduleEntry>,
}

impl FixedSchedules {
    pub fn graduate(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl ScheduleSource for FixedSchedules {
    async fn fetch_schedule(
        &self,
        kind: StudentKind,
        _student_id: &str,
        _term: &Term,
        _token: &SessionToken,
    ) -> Result<Vec<ScheduleEntry>, CrawlError> {
        match kind {
            StudentKind::Graduate => Ok(self.entries.clone()),
            StudentKind::Undergraduate => Err(CrawlError::SessionExpired {
                redirect_url: "https://sso.example.edu/login".to_string(),
            }),
        }
    }
}
