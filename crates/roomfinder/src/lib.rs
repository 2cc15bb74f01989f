pub mod config;
pub mod coord;
pub mod crawler;
pub mod db;
pub mod occupancy;
pub mod pipeline;
pub mod resolver;
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod types;
pub mod util;
pub mod warmer;

#[cfg(test)]
mod fakes;
