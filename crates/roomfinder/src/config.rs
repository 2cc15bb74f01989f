//! Process configuration, read from `ROOMFINDER_*` environment variables.
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::occupancy::{EnrollmentRecord, WeekMask};
use crate::pipeline::ReindexConfig;
use crate::resolver::ResolverConfig;
use crate::warmer::WarmerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {key} value {value:?}: {message}")]
    Invalid {
        key: String,
        value: String,
        message: String,
    },

    #[error("Cannot read data file {path}: {message}")]
    DataFile { path: String, message: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: String,
    /// Falls back to the in-process coordinator when unset
    pub redis_url: Option<String>,
    pub cookie_server: Url,
    pub room_query_url: Url,
    pub undergrad_schedule_url: Url,
    pub grad_schedule_url: Url,
    pub proxy_list_url: Option<Url>,
    pub year: String,
    pub semester: String,
    pub term_start: Option<NaiveDate>,
    pub page_size: u32,
    pub warm_pause: Duration,
    pub warm_student_id: Option<String>,
    pub request_timeout: Duration,
    pub reindex_interval: Duration,
    pub rooms_file: Option<PathBuf>,
    /// Enrollment roster loaded into the database at startup
    pub enrollments_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        Ok(Self {
            port: vars.parsed("ROOMFINDER_PORT", "3000")?,
            db_path: vars.string("ROOMFINDER_DB_PATH", "roomfinder.sqlite3"),
            redis_url: vars.optional("ROOMFINDER_REDIS_URL"),
            cookie_server: vars.url("ROOMFINDER_COOKIE_SERVER", "http://localhost:3001")?,
            room_query_url: vars.url(
                "ROOMFINDER_ROOM_QUERY_URL",
                "https://jwxt.example.edu/jwglxt/cdjy/cdjy_cxKxcdlb.html?doType=query",
            )?,
            undergrad_schedule_url: vars.url(
                "ROOMFINDER_UNDERGRAD_SCHEDULE_URL",
                "https://jwxt.example.edu/jwglxt/kbcx/xskbcx_cxXsKb.html",
            )?,
            grad_schedule_url: vars.url(
                "ROOMFINDER_GRAD_SCHEDULE_URL",
                "https://yjsxt.example.edu/pyxx/pygl/xskb.aspx",
            )?,
            proxy_list_url: vars
                .optional("ROOMFINDER_PROXY_LIST_URL")
                .map(|raw| parse_url("ROOMFINDER_PROXY_LIST_URL", &raw))
                .transpose()?,
            year: vars.string("ROOMFINDER_YEAR", "2024"),
            semester: vars.string("ROOMFINDER_SEMESTER", "1"),
            term_start: vars
                .optional("ROOMFINDER_TERM_START")
                .map(|raw| parse_value::<NaiveDate>("ROOMFINDER_TERM_START", &raw))
                .transpose()?,
            page_size: vars.parsed("ROOMFINDER_PAGE_SIZE", "500")?,
            warm_pause: Duration::from_millis(vars.parsed("ROOMFINDER_WARM_PAUSE_MS", "200")?),
            warm_student_id: vars.optional("ROOMFINDER_WARM_STUDENT_ID"),
            request_timeout: Duration::from_secs(
                vars.parsed("ROOMFINDER_REQUEST_TIMEOUT_SECS", "20")?,
            ),
            reindex_interval: Duration::from_secs(
                vars.parsed::<u64>("ROOMFINDER_REINDEX_INTERVAL_HOURS", "24")? * 60 * 60,
            ),
            rooms_file: vars.optional("ROOMFINDER_ROOMS_FILE").map(PathBuf::from),
            enrollments_file: vars.optional("ROOMFINDER_ENROLLMENTS_FILE").map(PathBuf::from),
        })
    }

    pub fn reindex_config(&self) -> ReindexConfig {
        ReindexConfig {
            page_size: self.page_size,
            ..ReindexConfig::default()
        }
    }

    pub fn warmer_config(&self) -> WarmerConfig {
        WarmerConfig {
            pause: self.warm_pause,
            ..WarmerConfig::default()
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            live_timeout: self.request_timeout,
            ..ResolverConfig::default()
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
    }

    fn parsed<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse_value(key, &self.string(key, default))
    }

    fn url(&self, key: &str, default: &str) -> Result<Url, ConfigError> {
        parse_url(key, &self.string(key, default))
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
        message: e.to_string(),
    })
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url: Url = parse_value(key, raw)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw.to_string(),
            message: "expected an http(s) URL".to_string(),
        });
    }
    Ok(url)
}

/// Week 1 starts on `term_start`. Dates before the term or past week 30
/// have no week.
pub fn current_week(term_start: NaiveDate, today: NaiveDate) -> Option<u8> {
    let days = (today - term_start).num_days();
    if days < 0 {
        return None;
    }
    let week = u8::try_from(days / 7 + 1).ok()?;
    WeekMask::single(week).map(|_| week)
}

/// Reads a JSON array of room ids.
pub fn load_rooms_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    load_json_file(path)
}

/// Reads a JSON array of enrollment rows in the roster's camelCase shape
/// (`id`, `day`, `where`, `classWhen`, `weekMask`, `year`, `semester`, ...).
pub fn load_enrollments_file(path: &Path) -> Result<Vec<EnrollmentRecord>, ConfigError> {
    load_json_file(path)
}

fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let file_error = |message: String| ConfigError::DataFile {
        path: path.display().to_string(),
        message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.page_size, 500);
        assert_eq!(config.reindex_interval, Duration::from_secs(24 * 60 * 60));
        assert!(config.redis_url.is_none());
        assert!(config.term_start.is_none());
        assert_eq!(config.cookie_server.as_str(), "http://localhost:3001/");
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let config = config_from(&[
            ("ROOMFINDER_PORT", "8080"),
            ("ROOMFINDER_REDIS_URL", "redis://cache:6379"),
            ("ROOMFINDER_TERM_START", "2024-09-02"),
            ("ROOMFINDER_WARM_STUDENT_ID", "  "),
            ("ROOMFINDER_WARM_PAUSE_MS", "50"),
            ("ROOMFINDER_ENROLLMENTS_FILE", "/srv/roster.json"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.term_start, NaiveDate::from_ymd_opt(2024, 9, 2));
        assert!(config.warm_student_id.is_none());
        assert_eq!(config.warmer_config().pause, Duration::from_millis(50));
        assert_eq!(config.enrollments_file, Some(PathBuf::from("/srv/roster.json")));
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(matches!(
            config_from(&[("ROOMFINDER_PORT", "eighty")]),
            Err(ConfigError::Invalid { ref key, .. }) if key == "ROOMFINDER_PORT"
        ));
        assert!(config_from(&[("ROOMFINDER_ROOM_QUERY_URL", "ftp://example.edu")]).is_err());
        assert!(config_from(&[("ROOMFINDER_TERM_START", "next monday")]).is_err());
    }

    #[test]
    fn test_current_week() {
        let start = NaiveDate::from_ymd_opt(2024, 9, 2).unwrap();
        let day = |m, d| NaiveDate::from_ymd_opt(2024, m, d).unwrap();

        assert_eq!(current_week(start, day(9, 1)), None);
        assert_eq!(current_week(start, day(9, 2)), Some(1));
        assert_eq!(current_week(start, day(9, 8)), Some(1));
        assert_eq!(current_week(start, day(9, 9)), Some(2));
        assert_eq!(current_week(start, day(10, 15)), Some(7));
        assert_eq!(current_week(start, start + chrono::Duration::days(30 * 7 - 1)), Some(30));
        assert_eq!(current_week(start, start + chrono::Duration::days(30 * 7)), None);
    }

    #[test]
    fn test_load_rooms_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["n1101", "n1102", "s2201"]"#).unwrap();

        let rooms = load_rooms_file(file.path()).unwrap();
        assert_eq!(rooms, vec!["n1101", "n1102", "s2201"]);

        assert!(matches!(
            load_rooms_file(Path::new("/nonexistent/rooms.json")),
            Err(ConfigError::DataFile { .. })
        ));
    }

    #[test]
    fn test_load_enrollments_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 7, "day": 4, "teacher": "Zhang", "where": "n1101", "classWhen": "3-4",
                 "weekMask": 4, "className": "Compilers", "credit": 3.0, "semester": "1", "year": "2024"}},
                {{"id": 8, "day": 2, "where": "s2201", "classWhen": "1-2", "weekMask": 1,
                 "semester": "1", "year": "2024"}}]"#
        )
        .unwrap();

        let records = load_enrollments_file(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].room, "n1101");
        assert_eq!(records[0].class_when, "3-4");
        assert_eq!(records[1].teacher, "");

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"[{{"id": 1}}]"#).unwrap();
        assert!(matches!(
            load_enrollments_file(bad.path()),
            Err(ConfigError::DataFile { .. })
        ));
    }
}
