/// Types for live room queries against the course-selection system
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::error::CrawlError;
use crate::occupancy::{section_bit, WeekMask};

/// The institution runs two campuses; room ids on the North campus start with `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Campus {
    Main,
    North,
}

impl Campus {
    pub const ALL: [Campus; 2] = [Campus::Main, Campus::North];

    /// Campus implied by the first character of a room prefix.
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix.chars().next() {
            Some('n') | Some('N') => Campus::North,
            _ => Campus::Main,
        }
    }

    /// Upstream campus id (`xqh_id`).
    pub fn id(self) -> &'static str {
        match self {
            Campus::Main => "1",
            Campus::North => "2",
        }
    }
}

/// Maps the local semester number to the upstream `xqm` code.
pub fn semester_code(semester: &str) -> &str {
    match semester {
        "1" => "3",
        "2" => "12",
        "3" => "16",
        other => other,
    }
}

/// One live query: rooms free at (week, day, section) on a campus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomQuery {
    pub year: String,
    pub semester: String,
    pub campus: Campus,
    /// Room-name prefix; empty asks for the whole campus.
    pub prefix: String,
    pub week: u8,
    pub day: u8,
    pub section: u8,
}

impl RoomQuery {
    /// Form fields for the room-query endpoint. Week and section go out as
    /// single-bit masks using the same convention as [`WeekMask`].
    pub fn form(&self) -> Result<Vec<(&'static str, String)>, CrawlError> {
        let week = WeekMask::single(self.week).ok_or_else(|| CrawlError::InvalidQuery {
            message: format!("week {} is outside the academic calendar", self.week),
        })?;
        let section = section_bit(self.section).ok_or_else(|| CrawlError::InvalidQuery {
            message: format!("section {} does not exist", self.section),
        })?;
        if !(1..=7).contains(&self.day) {
            return Err(CrawlError::InvalidQuery {
                message: format!("day {} is outside 1..=7", self.day),
            });
        }

        Ok(vec![
            ("xqh_id", self.campus.id().to_string()),
            ("xnm", self.year.clone()),
            ("xqm", semester_code(&self.semester).to_string()),
            ("cdmc", self.prefix.clone()),
            ("zcd", week.bits().to_string()),
            ("xqj", self.day.to_string()),
            ("jcd", section.to_string()),
        ])
    }
}

/// Body returned by the room-query endpoint.
#[derive(Debug, Deserialize)]
pub struct RoomQueryResponse {
    #[serde(default)]
    pub items: Vec<RoomItem>,
}

#[derive(Debug, Deserialize)]
pub struct RoomItem {
    /// Room name, e.g. `n1101`
    #[serde(default)]
    pub cdmc: String,
}

/// Extracts the room ids matching `prefix` from a room-query body.
///
/// A body that is not a JSON object is the login page the upstream serves
/// once a token has gone stale.
pub fn parse_rooms(body: &str, prefix: &str) -> Result<Vec<String>, CrawlError> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('{') {
        return Err(CrawlError::SessionExpired {
            redirect_url: "non-JSON body from room query".to_string(),
        });
    }

    let response: RoomQueryResponse = serde_json::from_str(trimmed)?;
    let rooms: BTreeSet<String> = response
        .items
        .into_iter()
        .map(|item| item.cdmc.trim().to_string())
        .filter(|room| !room.is_empty() && room.starts_with(prefix))
        .collect();
    Ok(rooms.into_iter().collect())
}
