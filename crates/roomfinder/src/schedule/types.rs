/// Types for normalized schedule data
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::ParseError;

/// Last academic week that can be encoded.
pub const MAX_WEEK: u8 = 30;

/// Last teaching section in a day.
pub const MAX_SECTION: u8 = 12;

/// One normalized (day, sections, weeks) triple.
///
/// Built only through [`TimeSlot::new`], which checks every bound, so a
/// `TimeSlot` in hand is always in range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    day: u8,
    sections: Vec<u8>,
    weeks: BTreeSet<u8>,
}

impl TimeSlot {
    /// Creates a time slot after validating day (1-7), sections (1-12) and
    /// weeks (1-30).
    pub fn new(
        day: u8,
        sections: Vec<u8>,
        weeks: BTreeSet<u8>,
    ) -> Result<Self, ParseError> {
        if !(1..=7).contains(&day) {
            return Err(ParseError::DayOutOfRange { day: day as u32 });
        }
        if let Some(&bad) = sections.iter().find(|s| !(1..=MAX_SECTION).contains(*s)) {
            return Err(ParseError::SectionOutOfRange {
                section: bad as u32,
                max: MAX_SECTION,
            });
        }
        if let Some(&bad) = weeks.iter().find(|w| !(1..=MAX_WEEK).contains(*w)) {
            return Err(ParseError::WeekOutOfRange {
                week: bad as u32,
                max: MAX_WEEK,
            });
        }
        if sections.is_empty() {
            return Err(ParseError::NoSections);
        }
        if weeks.is_empty() {
            return Err(ParseError::NoWeeks);
        }

        Ok(Self {
            day,
            sections,
            weeks,
        })
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    /// Sections in the order they were written (ascending for ranges).
    pub fn sections(&self) -> &[u8] {
        &self.sections
    }

    pub fn weeks(&self) -> &BTreeSet<u8> {
        &self.weeks
    }
}

/// Odd/even qualifier on a week sub-range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekParity {
    All,
    Odd,
    Even,
}

impl WeekParity {
    /// Maps the `单`/`双` qualifier to a parity.
    pub fn from_qualifier(qualifier: Option<&str>) -> Self {
        match qualifier {
            Some("单") => WeekParity::Odd,
            Some("双") => WeekParity::Even,
            _ => WeekParity::All,
        }
    }

    pub fn keeps(self, week: u8) -> bool {
        match self {
            WeekParity::All => true,
            WeekParity::Odd => week % 2 == 1,
            WeekParity::Even => week % 2 == 0,
        }
    }
}
