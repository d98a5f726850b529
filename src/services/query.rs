//! Read-side lookups against the committed snapshot

use crate::services::SnapshotStore;
use crate::types::{Result, StampedSnapshot, StatePopError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// One state's total, keyed by the casing stored in the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateEntry {
    pub state: String,
    pub population: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub names: Vec<String>,
    pub populations: Vec<u64>,
    pub updated_at: DateTime<Utc>,
}

/// Query service over a shared store. Never blocks on a refresh.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<SnapshotStore>,
}

impl QueryService {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// Whole committed snapshot
    pub fn get_all(&self) -> Result<Arc<StampedSnapshot>> {
        self.store.current().ok_or(StatePopError::NoData)
    }

    /// Case-insensitive lookup; surrounding whitespace in `name` is ignored.
    pub fn get_by_state(&self, name: &str) -> Result<StateEntry> {
        let current = self.get_all()?;
        let wanted = name.trim();
        current
            .snapshot
            .get_ignore_case(wanted)
            .map(|(state, population)| StateEntry {
                state: state.to_string(),
                population,
            })
            .ok_or_else(|| StatePopError::NotFound(wanted.to_string()))
    }

    /// Parallel name/population lists for the HTML page, from one snapshot
    pub fn listing(&self) -> Result<Listing> {
        let current = self.get_all()?;
        Ok(Listing {
            names: current.snapshot.names(),
            populations: current.snapshot.populations(),
            updated_at: current.updated_at,
        })
    }
}
