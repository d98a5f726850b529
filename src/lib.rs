//! statepop: county population rollups, refreshed on a schedule and served over HTTP

pub mod config;
pub mod server;
pub mod services;
pub mod types;
