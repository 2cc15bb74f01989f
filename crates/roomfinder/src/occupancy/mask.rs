//! Bitmask encodings shared by enrollment records, the index and the live
//! room-query endpoint.

use crate::schedule::{MAX_SECTION, MAX_WEEK};
use serde::{Deserialize, Serialize};

/// 30-bit week set: bit `w - 1` set means week `w` is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekMask(u32);

impl WeekMask {
    /// All 30 academic weeks.
    pub const FULL: u32 = (1 << MAX_WEEK) - 1;

    /// Wraps a raw column value, clearing any bit past the academic calendar.
    pub fn from_raw(raw: i64) -> Self {
        Self((raw as u64 & Self::FULL as u64) as u32)
    }

    /// Builds a mask from week numbers; weeks outside 1..=30 are dropped.
    pub fn from_weeks<I>(weeks: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        let bits = weeks
            .into_iter()
            .filter(|w| (1..=MAX_WEEK).contains(w))
            .fold(0u32, |acc, w| acc | (1 << (w - 1)));
        Self(bits)
    }

    /// A mask with exactly one week set, as the room-query endpoint expects.
    pub fn single(week: u8) -> Option<Self> {
        (1..=MAX_WEEK).contains(&week).then(|| Self(1 << (week - 1)))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, week: u8) -> bool {
        (1..=MAX_WEEK).contains(&week) && self.0 & (1 << (week - 1)) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Active weeks in ascending order.
    pub fn weeks(self) -> Vec<u8> {
        (1..=MAX_WEEK).filter(|&w| self.contains(w)).collect()
    }
}

/// Encodes week numbers into their integer mask.
pub fn weeks_to_mask(weeks: &[u8]) -> u32 {
    WeekMask::from_weeks(weeks.iter().copied()).bits()
}

/// Decodes an integer mask into ascending week numbers.
pub fn mask_to_weeks(mask: u32) -> Vec<u8> {
    WeekMask::from_raw(mask as i64).weeks()
}

/// Section set using the same bit convention as [`WeekMask`].
pub fn sections_to_mask<'a, I>(sections: I) -> u32
where
    I: IntoIterator<Item = &'a u8>,
{
    sections
        .into_iter()
        .filter(|s| (1..=MAX_SECTION).contains(*s))
        .fold(0u32, |acc, &s| acc | (1 << (s - 1)))
}

/// Single-section bit for the room-query endpoint.
pub fn section_bit(section: u8) -> Option<u32> {
    (1..=MAX_SECTION)
        .contains(&section)
        .then(|| 1 << (section - 1))
}
