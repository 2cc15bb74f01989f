/// Types for enrollment rows and indexed occupancy facts
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::mask::{sections_to_mask, WeekMask};
use crate::util::short_digest;

/// One class row from the enrollment roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub id: i64,
    pub day: u8,
    #[serde(default)]
    pub teacher: String,
    #[serde(rename = "where", default)]
    pub room: String,
    /// Section range, e.g. `"3-4"`
    pub class_when: String,
    pub week_mask: i64,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub credit: f32,
    pub semester: String,
    pub year: String,
}

/// One page of enrollment rows plus the total row count for the term.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentBatch {
    pub records: Vec<EnrollmentRecord>,
    pub total: u64,
}

/// "This room is occupied on this day, in these sections, during these
/// weeks" for one term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccupancyRecord {
    pub year: String,
    pub semester: String,
    #[serde(rename = "where")]
    pub room: String,
    pub day: u8,
    pub sections: BTreeSet<u8>,
    pub weeks: BTreeSet<u8>,
}

impl OccupancyRecord {
    /// Deterministic document id over (year, semester, room, day, weeks,
    /// sections); re-ingesting the same fact overwrites instead of
    /// duplicating.
    pub fn doc_id(&self) -> String {
        let day = self.day.to_string();
        let weeks = join(&self.weeks);
        let sections = join(&self.sections);

        short_digest(
            &[
                self.year.as_str(),
                self.semester.as_str(),
                self.room.as_str(),
                day.as_str(),
                weeks.as_str(),
                sections.as_str(),
            ],
            16,
        )
    }

    pub fn week_mask(&self) -> WeekMask {
        WeekMask::from_weeks(self.weeks.iter().copied())
    }

    pub fn section_mask(&self) -> u32 {
        sections_to_mask(&self.sections)
    }
}

fn join(values: &BTreeSet<u8>) -> String {
    values
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
