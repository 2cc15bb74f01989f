//! Occupancy codec
//!
//! Converts enrollment rows and parsed time slots into [`OccupancyRecord`]s
//! and owns the week/section bitmask conventions.

mod mask;
mod types;

pub use mask::*;
pub use types::*;

use crate::schedule::{TimeSlot, MAX_SECTION};
use thiserror::Error;

/// Reasons an enrollment row cannot become an occupancy record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Enrollment {id} has malformed classWhen {value:?}")]
    BadClassWhen { id: i64, value: String },

    #[error("Enrollment {id} has no room")]
    MissingRoom { id: i64 },

    #[error("Enrollment {id} has day {day} outside 1..=7")]
    BadDay { id: i64, day: u8 },

    #[error("Enrollment {id} has an empty week mask")]
    NoWeeks { id: i64 },
}

/// Converts a structured enrollment row into its occupancy record.
///
/// The row already carries day and room; only the `classWhen` range and the
/// week mask need expanding.
pub fn to_occupancy(record: &EnrollmentRecord) -> Result<OccupancyRecord, CodecError> {
    let room = record.room.trim();
    if room.is_empty() {
        return Err(CodecError::MissingRoom { id: record.id });
    }
    if !(1..=7).contains(&record.day) {
        return Err(CodecError::BadDay {
            id: record.id,
            day: record.day,
        });
    }

    let sections = parse_class_when(&record.class_when).ok_or_else(|| CodecError::BadClassWhen {
        id: record.id,
        value: record.class_when.clone(),
    })?;

    let mask = WeekMask::from_raw(record.week_mask);
    if mask.is_empty() {
        return Err(CodecError::NoWeeks { id: record.id });
    }

    Ok(OccupancyRecord {
        year: record.year.clone(),
        semester: record.semester.clone(),
        room: room.to_string(),
        day: record.day,
        sections: sections.into_iter().collect(),
        weeks: mask.weeks().into_iter().collect(),
    })
}

/// Pairs a parsed time slot with a room, for the free-text import path.
pub fn from_time_slot(year: &str, semester: &str, room: &str, slot: &TimeSlot) -> OccupancyRecord {
    OccupancyRecord {
        year: year.to_string(),
        semester: semester.to_string(),
        room: room.trim().to_string(),
        day: slot.day(),
        sections: slot.sections().iter().copied().collect(),
        weeks: slot.weeks().clone(),
    }
}

/// Expands `"A-B"` (or a lone `"A"`) into `[A..=B]`.
pub fn parse_class_when(value: &str) -> Option<Vec<u8>> {
    let value = value.trim();
    let (start, end) = match value.split_once('-') {
        Some((start, end)) => (start.trim().parse::<u8>().ok()?, end.trim().parse::<u8>().ok()?),
        None => {
            let single = value.parse::<u8>().ok()?;
            (single, single)
        }
    };

    if start == 0 || start > end || end > MAX_SECTION {
        return None;
    }
    Some((start..=end).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule;

    fn enrollment(id: i64, room: &str, class_when: &str, weeks: &[u8]) -> EnrollmentRecord {
        EnrollmentRecord {
            id,
            day: 2,
            teacher: "Zhang".to_string(),
            room: room.to_string(),
            class_when: class_when.to_string(),
            week_mask: weeks_to_mask(weeks) as i64,
            class_name: "Compilers".to_string(),
            credit: 3.0,
            semester: "1".to_string(),
            year: "2024".to_string(),
        }
    }

    #[test]
    fn test_enrollment_to_occupancy() {
        let record = enrollment(7, " n1101 ", "3-4", &[1, 3, 5]);
        let occupancy = to_occupancy(&record).unwrap();

        assert_eq!(occupancy.room, "n1101");
        assert_eq!(occupancy.day, 2);
        assert_eq!(occupancy.sections.iter().copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(occupancy.weeks.iter().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
        assert_eq!(occupancy.week_mask().bits(), 0b10101);
        assert_eq!(occupancy.section_mask(), 0b1100);
    }

    #[test]
    fn test_rejects_bad_rows() {
        assert!(matches!(
            to_occupancy(&enrollment(1, "", "1-2", &[1])),
            Err(CodecError::MissingRoom { id: 1 })
        ));
        assert!(matches!(
            to_occupancy(&enrollment(2, "n1101", "4-2", &[1])),
            Err(CodecError::BadClassWhen { .. })
        ));
        assert!(matches!(
            to_occupancy(&enrollment(3, "n1101", "1-2", &[])),
            Err(CodecError::NoWeeks { id: 3 })
        ));
    }

    #[test]
    fn test_class_when_forms() {
        assert_eq!(parse_class_when("1-2"), Some(vec![1, 2]));
        assert_eq!(parse_class_when(" 9 - 11 "), Some(vec![9, 10, 11]));
        assert_eq!(parse_class_when("5"), Some(vec![5]));
        assert_eq!(parse_class_when("0-2"), None);
        assert_eq!(parse_class_when("11-13"), None);
        assert_eq!(parse_class_when("a-b"), None);
    }

    #[test]
    fn test_doc_id_is_deterministic_and_identity_sensitive() {
        let a = to_occupancy(&enrollment(1, "n1101", "3-4", &[1, 2])).unwrap();
        let b = to_occupancy(&enrollment(99, "n1101", "3-4", &[1, 2])).unwrap();
        assert_eq!(a.doc_id(), b.doc_id());
        assert_eq!(a.doc_id().len(), 32);

        let other_room = to_occupancy(&enrollment(1, "n1102", "3-4", &[1, 2])).unwrap();
        let other_weeks = to_occupancy(&enrollment(1, "n1101", "3-4", &[1, 3])).unwrap();
        let other_sections = to_occupancy(&enrollment(1, "n1101", "3-5", &[1, 2])).unwrap();
        assert_ne!(a.doc_id(), other_room.doc_id());
        assert_ne!(a.doc_id(), other_weeks.doc_id());
        assert_ne!(a.doc_id(), other_sections.doc_id());
    }

    #[test]
    fn test_from_time_slot_matches_enrollment_path() {
        let slot = schedule::parse_clause("星期二第3-4节{1-2周}").unwrap();
        let from_text = from_time_slot("2024", "1", "n1101", &slot);
        let from_row = to_occupancy(&enrollment(5, "n1101", "3-4", &[1, 2])).unwrap();
        assert_eq!(from_text, from_row);
        assert_eq!(from_text.doc_id(), from_row.doc_id());
    }
}
