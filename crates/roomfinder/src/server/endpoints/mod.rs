pub mod free_rooms;
pub mod import;
pub mod schedule;
pub mod status;
