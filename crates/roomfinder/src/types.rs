use std::sync::Arc;
use std::time::Instant;

use crate::crawler::{ScheduleSource, SessionTokenSource};
use crate::db::OccupancyIndex;
use crate::resolver::AvailabilityResolver;
use crate::warmer::WarmQueue;

/// Shared state handed to every HTTP handler.
pub struct AppState {
    pub resolver: AvailabilityResolver,
    /// Write path for spreadsheet imports
    pub index: Arc<dyn OccupancyIndex>,
    pub tokens: Arc<dyn SessionTokenSource>,
    pub schedules: Arc<dyn ScheduleSource>,
    pub warm_queue: Option<Arc<WarmQueue>>,
    pub started_at: Instant,
}
