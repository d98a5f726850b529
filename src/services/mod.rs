//! Refresh-and-serve pipeline services

pub mod aggregator;
pub mod fetcher;
pub mod normalizer;
pub mod query;
pub mod scheduler;
pub mod store;

pub use aggregator::Aggregator;
pub use fetcher::{build_snapshot, ArcGisCountySource, CountySource, FetchReport, Fetcher};
pub use normalizer::{normalize_batch, normalize_record, RejectionTally};
pub use query::{Listing, QueryService, StateEntry};
pub use scheduler::{Cadence, CycleOutcome, LastRefresh, RefreshScheduler};
pub use store::{Hydration, SnapshotStore};
