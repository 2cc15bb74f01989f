//! Per-student timetable retrieval.
//!
//! Undergraduate and graduate students are served by different upstream
//! systems: the undergraduate one answers JSON rows carrying a section range
//! and a week mask, the graduate one renders an HTML table whose cells hold
//! free-text schedule notation.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use super::error::CrawlError;
use super::session::SessionToken;
use super::types::semester_code;
use crate::occupancy::{parse_class_when, WeekMask};
use crate::schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentKind {
    Undergraduate,
    Graduate,
}

impl FromStr for StudentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "undergraduate" | "undergrad" | "ug" => Ok(StudentKind::Undergraduate),
            "graduate" | "grad" | "pg" => Ok(StudentKind::Graduate),
            other => Err(format!("unknown student kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub year: String,
    pub semester: String,
}

/// One normalized timetable line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub class_name: String,
    pub teacher: String,
    pub room: String,
    pub day: u8,
    pub sections: Vec<u8>,
    pub weeks: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct UndergradSchedule {
    #[serde(default)]
    items: Vec<UndergradClass>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UndergradClass {
    #[serde(default)]
    class_name: String,
    #[serde(default)]
    teacher: String,
    #[serde(rename = "where", default)]
    room: String,
    day: u8,
    class_when: String,
    week_mask: i64,
}

/// One capability for both kinds of student; the kind picks the upstream.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_schedule(
        &self,
        kind: StudentKind,
        student_id: &str,
        term: &Term,
        token: &SessionToken,
    ) -> Result<Vec<ScheduleEntry>, CrawlError>;
}

pub struct ScheduleClient {
    client: Client,
    undergraduate_url: String,
    graduate_url: String,
}

impl ScheduleClient {
    pub fn new(
        undergraduate_url: &str,
        graduate_url: &str,
        timeout: Duration,
    ) -> Result<Self, CrawlError> {
        url::Url::parse(undergraduate_url)?;
        url::Url::parse(graduate_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            undergraduate_url: undergraduate_url.to_string(),
            graduate_url: graduate_url.to_string(),
        })
    }
}

#[async_trait]
impl ScheduleSource for ScheduleClient {
    async fn fetch_schedule(
        &self,
        kind: StudentKind,
        student_id: &str,
        term: &Term,
        token: &SessionToken,
    ) -> Result<Vec<ScheduleEntry>, CrawlError> {
        let (url, form) = match kind {
            StudentKind::Undergraduate => (
                &self.undergraduate_url,
                vec![
                    ("xnm", term.year.clone()),
                    ("xqm", semester_code(&term.semester).to_string()),
                    ("xh", student_id.to_string()),
                ],
            ),
            StudentKind::Graduate => (
                &self.graduate_url,
                vec![
                    ("xn", term.year.clone()),
                    ("xq", term.semester.clone()),
                    ("xh", student_id.to_string()),
                ],
            ),
        };

        let response = self
            .client
            .post(url)
            .header(COOKIE, token.cookie_header())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CrawlError::UnexpectedResponse {
                message: format!("schedule request returned status {}", response.status()),
            });
        }
        let body = response.text().await?;

        let entries = match kind {
            StudentKind::Undergraduate => parse_undergraduate(&body)?,
            StudentKind::Graduate => parse_graduate_html(&body)?,
        };
        info!(
            student_id = %student_id,
            kind = ?kind,
            entries = entries.len(),
            "Fetched student schedule"
        );
        Ok(entries)
    }
}

/// Decodes the undergraduate JSON body. Rows with a malformed section range
/// or an empty week mask are skipped.
pub fn parse_undergraduate(body: &str) -> Result<Vec<ScheduleEntry>, CrawlError> {
    if !body.trim_start().starts_with('{') {
        return Err(CrawlError::SessionExpired {
            redirect_url: "non-JSON schedule body".to_string(),
        });
    }
    let schedule: UndergradSchedule = serde_json::from_str(body)?;

    Ok(schedule
        .items
        .into_iter()
        .filter_map(|class| {
            let sections = parse_class_when(&class.class_when);
            let weeks = WeekMask::from_raw(class.week_mask).weeks();
            match sections {
                Some(sections) if !weeks.is_empty() && (1..=7).contains(&class.day) => {
                    Some(ScheduleEntry {
                        class_name: class.class_name,
                        teacher: class.teacher,
                        room: class.room.trim().to_string(),
                        day: class.day,
                        sections,
                        weeks,
                    })
                }
                _ => {
                    warn!(class = %class.class_name, class_when = %class.class_when, "Skipping malformed schedule row");
                    None
                }
            }
        })
        .collect())
}

static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.schedule tr, table#schedule tr").unwrap());
static CELL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());
static LOGIN_FORM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form#loginForm, input[type='password']").unwrap());

/// Parses the graduate timetable. Each data row is
/// `course | teacher | notation | room`; a row whose notation yields several
/// time slots becomes several entries.
pub fn parse_graduate_html(html: &str) -> Result<Vec<ScheduleEntry>, CrawlError> {
    let document = Html::parse_document(html);
    if document.select(&LOGIN_FORM_SELECTOR).next().is_some() {
        return Err(CrawlError::SessionExpired {
            redirect_url: "graduate schedule login form".to_string(),
        });
    }

    let mut saw_table = false;
    let mut entries = Vec::new();
    for row in document.select(&ROW_SELECTOR) {
        saw_table = true;
        let cells: Vec<String> = row.select(&CELL_SELECTOR).map(cell_text).collect();
        let [class_name, teacher, notation, room, ..] = cells.as_slice() else {
            continue;
        };

        for slot in schedule::parse(notation) {
            entries.push(ScheduleEntry {
                class_name: class_name.clone(),
                teacher: teacher.clone(),
                room: room.clone(),
                day: slot.day(),
                sections: slot.sections().to_vec(),
                weeks: slot.weeks().iter().copied().collect(),
            });
        }
    }

    if !saw_table {
        return Err(CrawlError::ParseError {
            message: "graduate schedule table not found".to_string(),
        });
    }
    Ok(entries)
}

fn cell_text(cell: ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::weeks_to_mask;

    #[test]
    fn test_student_kind_from_str() {
        assert_eq!("Graduate".parse::<StudentKind>(), Ok(StudentKind::Graduate));
        assert_eq!("ug".parse::<StudentKind>(), Ok(StudentKind::Undergraduate));
        assert!("staff".parse::<StudentKind>().is_err());
    }

    #[test]
    fn test_parse_undergraduate() {
        let body = format!(
            r#"{{"items":[
                {{"className":"Compilers","teacher":"Li","where":"n1101","day":4,"classWhen":"3-4","weekMask":{}}},
                {{"className":"Broken","teacher":"Li","where":"n1101","day":4,"classWhen":"x","weekMask":1}}
            ]}}"#,
            weeks_to_mask(&[1, 3, 5])
        );

        let entries = parse_undergraduate(&body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sections, vec![3, 4]);
        assert_eq!(entries[0].weeks, vec![1, 3, 5]);
        assert_eq!(entries[0].room, "n1101");
    }

    #[test]
    fn test_parse_undergraduate_login_page() {
        let err = parse_undergraduate("<!DOCTYPE html><html></html>").unwrap_err();
        assert!(err.needs_reauth());
    }

    #[test]
    fn test_parse_graduate_html() {
        let html = r#"
            <html><body><table class="schedule">
              <tr><th>Course</th><th>Teacher</th><th>Time</th><th>Room</th></tr>
              <tr><td>Algorithms</td><td>Wang</td><td>星期一第5-8节{4-6周(双),7-8周};星期三第1-2节{1-2周}</td><td> s2203 </td></tr>
              <tr><td>Seminar</td><td>Zhao</td><td>待定</td><td>s2204</td></tr>
            </table></body></html>
        "#;

        let entries = parse_graduate_html(html).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].day, 1);
        assert_eq!(entries[0].weeks, vec![4, 6, 8]);
        assert_eq!(entries[0].room, "s2203");
        assert_eq!(entries[1].day, 3);
        assert_eq!(entries[1].sections, vec![1, 2]);
    }

    #[test]
    fn test_parse_graduate_html_errors() {
        assert!(parse_graduate_html("<html><body>nothing</body></html>").is_err());
        let login = r#"<form id="loginForm"><input type="password"></form>"#;
        assert!(parse_graduate_html(login).unwrap_err().needs_reauth());
    }
}
