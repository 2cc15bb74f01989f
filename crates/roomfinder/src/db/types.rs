/// Database types for the occupancy index
use serde::Serialize;
use thiserror::Error;

/// Filter for the distinct-room aggregation over occupancy documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyQuery {
    pub year: String,
    pub semester: String,
    pub week: u8,
    pub day: u8,
    pub section: u8,
    pub prefix: String,
}

/// Outcome of one bulk upsert. Failed documents do not abort the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub written: usize,
    pub failed: Vec<FailedDoc>,
}

impl BulkReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDoc {
    pub doc_id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Index connection lock poisoned")]
    Poisoned,

    #[error("Index unavailable: {message}")]
    Unavailable { message: String },
}
