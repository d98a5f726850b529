//! Runtime configuration from flags and environment

use crate::services::fetcher::{DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECS, DEFAULT_UPSTREAM_URL};
use crate::services::Cadence;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Service settings. Every value can come from a flag or its env variable.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0", global = true)]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8000, global = true)]
    pub port: u16,

    /// Refresh cadence: "hourly" (top of hour), "<n>s", "<n>m", "<n>h" or seconds
    #[arg(long, env = "REFRESH_CADENCE", default_value = "hourly", global = true)]
    pub refresh: Cadence,

    /// Durable snapshot file
    #[arg(
        long,
        env = "SNAPSHOT_FILE",
        default_value = "statePopulation.json",
        global = true
    )]
    pub snapshot_file: PathBuf,

    /// Counties feature layer query endpoint
    #[arg(long, env = "UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL, global = true)]
    pub upstream_url: String,

    /// Upstream request timeout in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    pub upstream_timeout: u64,

    /// Records requested per upstream page
    #[arg(long, env = "UPSTREAM_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE, global = true)]
    pub page_size: u32,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }
}
