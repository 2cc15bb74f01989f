//! Live access to the institution's course-selection system: the room-query
//! endpoint, session tokens, per-student timetables and the outbound proxy
//! pool.

mod client;
mod error;
mod proxy;
mod schedule;
mod session;
mod types;

pub use client::{CrawlerConfig, HttpRoomCrawler, RoomCrawler};
pub use error::CrawlError;
pub use proxy::{parse_proxy_list, ProxyPool};
pub use schedule::{
    parse_graduate_html, parse_undergraduate, ScheduleClient, ScheduleEntry, ScheduleSource,
    StudentKind, Term,
};
pub use session::{CookieServerTokenSource, SessionError, SessionToken, SessionTokenSource};
pub use types::{parse_rooms, semester_code, Campus, RoomQuery};
