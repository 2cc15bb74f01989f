/// Types for free-room queries and answers
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::occupancy::WeekMask;
use crate::schedule::MAX_SECTION;

/// `findFree(year, semester, student, week, day, sections, prefix)`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FreeRoomQuery {
    pub year: String,
    pub semester: String,
    /// Whose session the live tier borrows
    pub student_id: String,
    pub week: u8,
    pub day: u8,
    pub sections: Vec<u8>,
    /// Building prefix, e.g. `n1`
    pub prefix: String,
}

impl FreeRoomQuery {
    pub fn validate(&self) -> Result<(), ResolveError> {
        let invalid = |message: String| -> Result<(), ResolveError> {
            Err(ResolveError::InvalidQuery { message })
        };

        if self.year.trim().is_empty() || self.semester.trim().is_empty() {
            return invalid("year and semester are required".to_string());
        }
        if self.prefix.trim().is_empty() {
            return invalid("room prefix is required".to_string());
        }
        if WeekMask::single(self.week).is_none() {
            return invalid(format!("week {} is outside 1..=30", self.week));
        }
        if !(1..=7).contains(&self.day) {
            return invalid(format!("day {} is outside 1..=7", self.day));
        }
        if self.sections.is_empty() {
            return invalid("at least one section is required".to_string());
        }
        if let Some(bad) = self
            .sections
            .iter()
            .find(|s| !(1..=MAX_SECTION).contains(*s))
        {
            return invalid(format!("section {bad} is outside 1..={MAX_SECTION}"));
        }
        Ok(())
    }

    /// Validated copy with the prefix trimmed and lower-cased, the form room
    /// ids are stored in.
    pub fn normalized(&self) -> Result<Self, ResolveError> {
        self.validate()?;
        Ok(Self {
            prefix: self.prefix.trim().to_lowercase(),
            ..self.clone()
        })
    }
}

/// Which tier produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    WarmCache,
    LiveCrawl,
    Index,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::WarmCache => "warm_cache",
            Provenance::LiveCrawl => "live_crawl",
            Provenance::Index => "index",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeRoomRow {
    pub room: String,
    /// One flag per requested section, in request order
    pub free: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeRoomAnswer {
    pub source: Provenance,
    pub sections: Vec<u8>,
    pub rows: Vec<FreeRoomRow>,
}

impl FreeRoomAnswer {
    /// Rows from per-section free lists. Rooms appear if they are free in at
    /// least one requested section.
    pub(crate) fn from_free_lists(
        source: Provenance,
        sections: &[u8],
        free: Vec<BTreeSet<String>>,
    ) -> Self {
        let rooms: BTreeSet<&String> = free.iter().flatten().collect();
        let rows = rooms
            .into_iter()
            .map(|room| FreeRoomRow {
                room: room.clone(),
                free: free.iter().map(|set| set.contains(room)).collect(),
            })
            .collect();

        Self {
            source,
            sections: sections.to_vec(),
            rows,
        }
    }

    /// Rows from the full catalog minus per-section occupied sets.
    pub(crate) fn from_catalog(
        sections: &[u8],
        catalog: Vec<String>,
        occupied: &[BTreeSet<String>],
    ) -> Self {
        let rows = catalog
            .into_iter()
            .map(|room| FreeRoomRow {
                free: occupied.iter().map(|set| !set.contains(&room)).collect(),
                room,
            })
            .collect();

        Self {
            source: Provenance::Index,
            sections: sections.to_vec(),
            rows,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Every tier missed or failed; distinct from an empty answer.
    #[error("Search failed: {}", .reasons.join("; "))]
    SearchFailed { reasons: Vec<String> },
}
