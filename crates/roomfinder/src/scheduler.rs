//! Periodic maintenance: clear stale terms, reindex the current term and
//! queue a warm sweep for the current week.

use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pipeline::Reindexer;
use crate::warmer::{WarmQueue, WarmRequest};

/// What each cycle works on.
#[derive(Debug, Clone)]
pub struct SchedulePlan {
    pub year: String,
    pub semester: String,
    pub term_start: Option<NaiveDate>,
    /// Whose session the warm sweep borrows; no sweep without one
    pub warm_student_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cleared: Option<usize>,
    pub documents_written: Option<usize>,
    pub warm_week: Option<u8>,
    pub errors: Vec<String>,
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    reindexer: Arc<Reindexer>,
    warm_queue: Option<Arc<WarmQueue>>,
    plan: SchedulePlan,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(reindexer: Arc<Reindexer>, warm_queue: Option<Arc<WarmQueue>>, plan: SchedulePlan) -> Self {
        Self {
            reindexer,
            warm_queue,
            plan,
            running: Mutex::new(None),
        }
    }

    /// One maintenance cycle for the given date. Failures are collected in
    /// the report; later steps still run.
    pub async fn run_cycle(&self, today: NaiveDate) -> CycleReport {
        let plan = &self.plan;
        let mut report = CycleReport::default();

        match self
            .reindexer
            .clear_other_terms(&plan.year, &plan.semester)
            .await
        {
            Ok(cleared) => report.cleared = Some(cleared),
            Err(e) => {
                error!(error = %e, "Scheduled clear failed");
                report.errors.push(e.to_string());
            }
        }

        match self.reindexer.reindex(&plan.year, &plan.semester).await {
            Ok(reindex) => report.documents_written = Some(reindex.documents_written),
            Err(e) => {
                error!(error = %e, "Scheduled reindex failed");
                report.errors.push(e.to_string());
            }
        }

        let week = plan
            .term_start
            .and_then(|start| crate::config::current_week(start, today));
        if let (Some(queue), Some(student_id), Some(week)) =
            (self.warm_queue.as_ref(), plan.warm_student_id.as_ref(), week)
        {
            if queue.submit(WarmRequest {
                year: plan.year.clone(),
                semester: plan.semester.clone(),
                week,
                student_id: student_id.clone(),
            }) {
                report.warm_week = Some(week);
            }
        } else {
            debug!(week = ?week, "No warm sweep this cycle");
        }

        info!(
            cleared = ?report.cleared,
            documents = ?report.documents_written,
            warm_week = ?report.warm_week,
            errors = report.errors.len(),
            "Maintenance cycle finished"
        );
        report
    }

    /// Runs a cycle immediately and then every `every`. Returns false if the
    /// loop is already running.
    pub fn spawn(self: &Arc<Self>, every: Duration) -> bool {
        let Ok(mut slot) = self.running.lock() else {
            return false;
        };
        if slot.is_some() {
            return false;
        }

        let (stop, mut stopped) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_cycle(Local::now().date_naive()).await;
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("Scheduler stopped");
        });

        *slot = Some(Running { stop, handle });
        true
    }

    /// Stops the loop after the cycle in progress, if any.
    pub async fn shutdown(&self) {
        let running = self.running.lock().ok().and_then(|mut slot| slot.take());
        if let Some(running) = running {
            let _ = running.stop.send(true);
            if let Err(e) = running.handle.await {
                error!(error = %e, "Scheduler task panicked");
            }
        }
    }
}
