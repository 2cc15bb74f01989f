/// Schedule-notation parsing
///
/// Turns strings such as `星期一第5-8节{4-6周(双),7-8周};星期四第3-4节{4-19周}`
/// into normalized [`TimeSlot`]s. Clauses are separated by `;`, each clause
/// carries a day, a section range and a `{...}` block of week sub-ranges.
mod error;
mod types;

pub use error::ParseError;
pub use types::*;

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::warn;

static DAY_SECTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^星期([一二三四五六日天])第(\d+)(?:-(\d+))?节$").unwrap());
static WEEK_RANGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:-(\d+))?周(?:[(（](单|双)[)）])?$").unwrap()
});

/// Parses a full notation string into one time slot per valid clause.
///
/// Malformed clauses are logged and skipped; upstream exports sometimes
/// truncate the last clause, and the rest of the string is still usable.
pub fn parse(notation: &str) -> Vec<TimeSlot> {
    notation
        .split([';', '；'])
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .filter_map(|clause| match parse_clause(clause) {
            Ok(slot) => Some(slot),
            Err(e) => {
                warn!(clause = %clause, error = %e, "Skipping malformed schedule clause");
                None
            }
        })
        .collect()
}

/// Parses exactly one clause, e.g. `星期四第3-4节{4-19周}`.
pub fn parse_clause(clause: &str) -> Result<TimeSlot, ParseError> {
    let compact: String = clause.chars().filter(|c| !c.is_whitespace()).collect();

    let open = compact
        .find('{')
        .ok_or_else(|| ParseError::MissingWeekBlock {
            clause: clause.to_string(),
        })?;
    let close = compact
        .rfind('}')
        .filter(|&close| close > open)
        .ok_or_else(|| ParseError::MissingWeekBlock {
            clause: clause.to_string(),
        })?;

    let (day, sections) = parse_day_sections(&compact[..open])?;
    let weeks = parse_weeks(&compact[open + 1..close])?;

    TimeSlot::new(day, sections, weeks)
}

/// Maps a Chinese day numeral to 1 (Monday) ..= 7 (Sunday).
pub fn day_from_numeral(numeral: &str) -> Option<u8> {
    match numeral {
        "一" => Some(1),
        "二" => Some(2),
        "三" => Some(3),
        "四" => Some(4),
        "五" => Some(5),
        "六" => Some(6),
        "日" | "天" => Some(7),
        _ => None,
    }
}

fn parse_day_sections(text: &str) -> Result<(u8, Vec<u8>), ParseError> {
    let bad = || ParseError::BadDaySection {
        text: text.to_string(),
    };

    let caps = DAY_SECTION_REGEX.captures(text).ok_or_else(bad)?;
    let day = caps
        .get(1)
        .and_then(|m| day_from_numeral(m.as_str()))
        .ok_or_else(bad)?;

    let start = parse_number(caps.get(2).map(|m| m.as_str()), text)?;
    let end = match caps.get(3) {
        Some(m) => parse_number(Some(m.as_str()), text)?,
        None => start,
    };
    let (start, end) = checked_range(start, end, MAX_SECTION, |section| {
        ParseError::SectionOutOfRange {
            section,
            max: MAX_SECTION,
        }
    })?;

    Ok((day, (start..=end).collect()))
}

fn parse_weeks(block: &str) -> Result<BTreeSet<u8>, ParseError> {
    let ranges = block
        .split([',', '，'])
        .filter(|p| !p.is_empty())
        .map(parse_week_range)
        .collect::<Result<Vec<_>, _>>()?;

    // Unqualified sub-ranges inherit the block's qualifier when the block
    // carries exactly one kind of qualifier.
    let mut explicit = ranges
        .iter()
        .map(|r| r.parity)
        .filter(|&p| p != WeekParity::All);
    let inherited = match explicit.next() {
        Some(first) if explicit.all(|p| p == first) => first,
        _ => WeekParity::All,
    };

    let mut weeks = BTreeSet::new();
    for range in ranges {
        let parity = match range.parity {
            WeekParity::All => inherited,
            explicit => explicit,
        };
        weeks.extend((range.start..=range.end).filter(|&w| parity.keeps(w)));
    }

    Ok(weeks)
}

struct WeekRange {
    start: u8,
    end: u8,
    parity: WeekParity,
}

/// Reads one `S-E周` / `S-E周(单|双)` sub-range.
fn parse_week_range(part: &str) -> Result<WeekRange, ParseError> {
    let caps = WEEK_RANGE_REGEX
        .captures(part)
        .ok_or_else(|| ParseError::BadWeekRange {
            text: part.to_string(),
        })?;

    let start = parse_number(caps.get(1).map(|m| m.as_str()), part)?;
    let end = match caps.get(2) {
        Some(m) => parse_number(Some(m.as_str()), part)?,
        None => start,
    };
    let (start, end) = checked_range(start, end, MAX_WEEK, |week| ParseError::WeekOutOfRange {
        week,
        max: MAX_WEEK,
    })?;

    Ok(WeekRange {
        start,
        end,
        parity: WeekParity::from_qualifier(caps.get(3).map(|m| m.as_str())),
    })
}

fn parse_number(digits: Option<&str>, context: &str) -> Result<u32, ParseError> {
    digits
        .and_then(|d| d.parse::<u32>().ok())
        .ok_or_else(|| ParseError::BadWeekRange {
            text: context.to_string(),
        })
}

fn checked_range(
    start: u32,
    end: u32,
    max: u8,
    out_of_range: impl Fn(u32) -> ParseError,
) -> Result<(u8, u8), ParseError> {
    if start > end {
        return Err(ParseError::InvertedRange { start, end });
    }
    for bound in [start, end] {
        if bound == 0 || bound > max as u32 {
            return Err(out_of_range(bound));
        }
    }
    Ok((start as u8, end as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weeks_of(slot: &TimeSlot) -> Vec<u8> {
        slot.weeks().iter().copied().collect()
    }

    #[test]
    fn test_single_clause() {
        let slots = parse("星期四第3-4节{4-19周}");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day(), 4);
        assert_eq!(slots[0].sections(), &[3, 4]);
        assert_eq!(weeks_of(&slots[0]), (4..=19).collect::<Vec<u8>>());
    }

    #[test]
    fn test_even_qualifier_mixed_with_plain_range() {
        let slots = parse("星期一第5-8节{4-6周(双),7-8周}");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day(), 1);
        assert_eq!(slots[0].sections(), &[5, 6, 7, 8]);
        assert_eq!(weeks_of(&slots[0]), vec![4, 6, 8]);
    }

    #[test]
    fn test_mixed_qualifiers_stay_per_range() {
        let slot = parse_clause("星期三第1-2节{1-4周(单),5-8周(双),9-10周}").unwrap();
        assert_eq!(weeks_of(&slot), vec![1, 3, 6, 8, 9, 10]);
    }

    #[test]
    fn test_even_qualifier_only() {
        let slot = parse_clause("星期一第5-8节{4-8周(双)}").unwrap();
        assert_eq!(weeks_of(&slot), vec![4, 6, 8]);
    }

    #[test]
    fn test_odd_and_even_ranges_respect_bounds() {
        for start in 1..=MAX_WEEK {
            for end in start..=MAX_WEEK {
                let odd = parse_clause(&format!("星期二第1-2节{{{start}-{end}周(单)}}"));
                let even = parse_clause(&format!("星期二第1-2节{{{start}-{end}周(双)}}"));

                match odd {
                    Ok(slot) => assert!(slot
                        .weeks()
                        .iter()
                        .all(|&w| w % 2 == 1 && w >= start && w <= end)),
                    Err(e) => assert_eq!(e, ParseError::NoWeeks),
                }
                match even {
                    Ok(slot) => assert!(slot
                        .weeks()
                        .iter()
                        .all(|&w| w % 2 == 0 && w >= start && w <= end)),
                    Err(e) => assert_eq!(e, ParseError::NoWeeks),
                }
            }
        }
    }

    #[test]
    fn test_multiple_clauses_keep_order() {
        let slots = parse("星期五第1-2节{1-16周};星期二第9-10节{2-8周(双)};星期日第3节{5周}");
        let days: Vec<u8> = slots.iter().map(|s| s.day()).collect();
        assert_eq!(days, vec![5, 2, 7]);
        assert_eq!(slots[2].sections(), &[3]);
        assert_eq!(weeks_of(&slots[2]), vec![5]);
    }

    #[test]
    fn test_clause_without_week_block_is_skipped() {
        let slots = parse("星期三第1-2节;星期四第3-4节{4-19周}");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day(), 4);
        assert!(matches!(
            parse_clause("星期三第1-2节"),
            Err(ParseError::MissingWeekBlock { .. })
        ));
    }

    #[test]
    fn test_truncated_trailing_clause() {
        let slots = parse("星期一第1-2节{1-8周};星期二第3-4节{1-");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].day(), 1);
    }

    #[test]
    fn test_full_width_separators_and_whitespace() {
        let slots = parse("星期一 第1-2节 {1-3周，5周（单）}；星期六第11-12节{9-10周}");
        assert_eq!(slots.len(), 2);
        assert_eq!(weeks_of(&slots[0]), vec![1, 3, 5]);
        assert_eq!(slots[1].day(), 6);
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(matches!(
            parse_clause("星期一第1-2节{1-31周}"),
            Err(ParseError::WeekOutOfRange { week: 31, .. })
        ));
        assert!(matches!(
            parse_clause("星期一第0-2节{1-3周}"),
            Err(ParseError::SectionOutOfRange { section: 0, .. })
        ));
        assert!(matches!(
            parse_clause("星期一第4-2节{1-3周}"),
            Err(ParseError::InvertedRange { start: 4, end: 2 })
        ));
        assert!(matches!(
            parse_clause("星期八第1-2节{1-3周}"),
            Err(ParseError::BadDaySection { .. })
        ));
    }

    #[test]
    fn test_empty_notation() {
        assert!(parse("").is_empty());
        assert!(parse(" ; ").is_empty());
    }
}
