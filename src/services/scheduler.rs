//! Refresh scheduler
//!
//! Runs a fetch once at startup and then on a fixed cadence. A successful
//! fetch replaces the stored snapshot; a failed one leaves it alone, so the
//! service degrades to stale data instead of going dark. At most one cycle is
//! in flight: a tick that fires while a cycle is running is dropped.

use crate::services::{Fetcher, SnapshotStore};
use crate::types::{Result, StatePopError};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const SECS_PER_HOUR: i64 = 3600;

/// A top-of-hour wait shorter than this belongs to the tick that just fired
const MIN_HOURLY_DELAY: Duration = Duration::from_secs(1);

/// When refresh ticks fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// At hh:00:00 UTC every hour
    TopOfHour,
    /// Fixed interval from the previous tick
    Every(Duration),
}

impl Cadence {
    /// Time to wait from `now` until the next tick.
    ///
    /// The monotonic sleep can wake a hair before the wall clock reaches
    /// hh:00; in that case the wait skips to the following hour.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Cadence::TopOfHour => {
                let into_hour = now.timestamp().rem_euclid(SECS_PER_HOUR) as u64;
                let nanos = u64::from(now.timestamp_subsec_nanos());
                let delay = Duration::from_secs(SECS_PER_HOUR as u64 - into_hour)
                    - Duration::from_nanos(nanos);
                if delay < MIN_HOURLY_DELAY {
                    delay + Duration::from_secs(SECS_PER_HOUR as u64)
                } else {
                    delay
                }
            }
            Cadence::Every(d) => *d,
        }
    }
}

impl FromStr for Cadence {
    type Err = StatePopError;

    /// Accepts `hourly`, `<n>s`, `<n>m`, `<n>h` or a plain number of seconds.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s == "hourly" || s == "top-of-hour" {
            return Ok(Cadence::TopOfHour);
        }

        let (digits, unit) = match s.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
            _ => (s.as_str(), 's'),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| StatePopError::Config(format!("invalid refresh cadence: {}", s)))?;
        let secs = match unit {
            's' => n,
            'm' => n.saturating_mul(60),
            'h' => n.saturating_mul(3600),
            _ => {
                return Err(StatePopError::Config(format!(
                    "invalid refresh cadence unit: {}",
                    unit
                )))
            }
        };
        if secs == 0 {
            return Err(StatePopError::Config(
                "refresh cadence must be positive".into(),
            ));
        }
        Ok(Cadence::Every(Duration::from_secs(secs)))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::TopOfHour => f.write_str("hourly"),
            Cadence::Every(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

/// How one trigger ended
#[derive(Debug)]
pub enum CycleOutcome {
    /// New snapshot is live
    Committed {
        states: usize,
        accepted: usize,
        rejected: usize,
        updated_at: DateTime<Utc>,
    },
    /// Fetch failed; the previous snapshot stays authoritative
    Skipped(StatePopError),
    /// Another cycle was in flight; this trigger did nothing
    AlreadyRunning,
}

/// Summary of the most recent finished cycle
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LastRefresh {
    pub outcome: &'static str,
    pub reason: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub accepted: usize,
    pub rejected: usize,
}

/// Clears the in-flight flag when a cycle ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RefreshScheduler {
    fetcher: Fetcher,
    store: Arc<SnapshotStore>,
    cadence: Cadence,
    running: AtomicBool,
    last: ArcSwapOption<LastRefresh>,
}

impl RefreshScheduler {
    pub fn new(fetcher: Fetcher, store: Arc<SnapshotStore>, cadence: Cadence) -> Self {
        Self {
            fetcher,
            store,
            cadence,
            running: AtomicBool::new(false),
            last: ArcSwapOption::empty(),
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_refresh(&self) -> Option<Arc<LastRefresh>> {
        self.last.load_full()
    }

    /// Run one refresh cycle unless one is already in flight.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("refresh already in progress, dropping tick");
            return CycleOutcome::AlreadyRunning;
        }
        let _guard = RunningGuard(&self.running);

        info!(source = self.fetcher.source_name(), "refresh cycle started");
        match self.fetcher.fetch().await {
            Ok(report) => {
                let states = report.snapshot.len();
                let rejected = report.rejections.total();
                let updated_at = match self.store.replace(report.snapshot).await {
                    Ok(at) => at,
                    Err(e) => {
                        warn!(error = %e, "snapshot committed but not persisted");
                        self.store
                            .current()
                            .map(|c| c.updated_at)
                            .unwrap_or_else(Utc::now)
                    }
                };
                info!(
                    states,
                    accepted = report.accepted,
                    rejected,
                    "refresh cycle committed"
                );
                self.record(LastRefresh {
                    outcome: "committed",
                    reason: None,
                    finished_at: Utc::now(),
                    accepted: report.accepted,
                    rejected,
                });
                CycleOutcome::Committed {
                    states,
                    accepted: report.accepted,
                    rejected,
                    updated_at,
                }
            }
            Err(e) => {
                warn!(
                    kind = e.kind(),
                    error = %e,
                    "refresh cycle failed, keeping last good snapshot"
                );
                let rejected = match &e {
                    StatePopError::EmptyResult { rejected, .. } => *rejected,
                    _ => 0,
                };
                self.record(LastRefresh {
                    outcome: "skipped",
                    reason: Some(e.to_string()),
                    finished_at: Utc::now(),
                    accepted: 0,
                    rejected,
                });
                CycleOutcome::Skipped(e)
            }
        }
    }

    fn record(&self, last: LastRefresh) {
        self.last.store(Some(Arc::new(last)));
    }

    /// Start the refresh loop: one cycle now, then one per tick.
    ///
    /// Each cycle runs on its own task so ticks keep their schedule; a tick
    /// that lands on a running cycle is dropped by `run_cycle`.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        info!(cadence = %self.cadence, "refresh loop started");
        tokio::spawn(async move {
            loop {
                let cycle = Arc::clone(&scheduler);
                tokio::spawn(async move {
                    cycle.run_cycle().await;
                });
                let delay = scheduler.cadence.next_delay(Utc::now());
                tokio::time::sleep(delay).await;
            }
        })
    }
}
