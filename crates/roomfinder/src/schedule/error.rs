//! Error types for schedule-notation parsing.

use thiserror::Error;

/// Reasons a single schedule clause is rejected.
///
/// These never abort a batch: the parser logs them and moves on to the next
/// clause.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The clause has no `{...}` week block
    #[error("Missing week block in clause: {clause}")]
    MissingWeekBlock { clause: String },

    /// The part before `{` is not `星期X第A-B节`
    #[error("Unrecognised day/section notation: {text}")]
    BadDaySection { text: String },

    /// A comma-separated week sub-range did not match `S-E周` or `S-E周(单|双)`
    #[error("Unrecognised week range: {text}")]
    BadWeekRange { text: String },

    #[error("Day {day} outside 1..=7")]
    DayOutOfRange { day: u32 },

    #[error("Section {section} outside 1..={max}")]
    SectionOutOfRange { section: u32, max: u8 },

    #[error("Week {week} outside 1..={max}")]
    WeekOutOfRange { week: u32, max: u8 },

    #[error("Inverted range {start}-{end}")]
    InvertedRange { start: u32, end: u32 },

    #[error("Clause lists no sections")]
    NoSections,

    /// Every sub-range was filtered away (e.g. `3-3周(双)`)
    #[error("Clause resolves to no weeks")]
    NoWeeks,
}
