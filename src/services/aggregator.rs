//! Aggregator service for rolling counties up into state totals

use crate::types::{NormalizedRecord, Snapshot};

/// Aggregator for computing per-state population totals
pub struct Aggregator;

impl Aggregator {
    /// Fold normalized counties into one snapshot.
    ///
    /// State names match exactly and case-sensitively. Totals do not depend on
    /// input order; entry order (and so the casing a caller sees first) is the
    /// order in which each distinct name first appears.
    pub fn by_state(records: &[NormalizedRecord]) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for record in records {
            snapshot.add(&record.state_name, record.population);
        }
        snapshot
    }
}
