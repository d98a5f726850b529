use thiserror::Error;

/// statepop error types
#[derive(Error, Debug)]
pub enum StatePopError {
    /// Transport failure, timeout, non-success status or unusable payload
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream answered but no record survived normalization
    #[error("empty result: {received} records received, {rejected} rejected")]
    EmptyResult { received: usize, rejected: usize },

    /// Durable snapshot copy could not be trusted at startup
    #[error("store hydration error: {0}")]
    StoreHydration(String),

    /// No snapshot key matches the requested state
    #[error("state not found: {0}")]
    NotFound(String),

    /// No refresh cycle has completed and nothing was hydrated
    #[error("no data yet")]
    NoData,

    /// Durable write of a committed snapshot failed
    #[error("persist error: {0}")]
    Persist(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// File I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StatePopError {
    /// Per-cycle failures that leave the current snapshot untouched
    pub fn is_refresh_failure(&self) -> bool {
        matches!(
            self,
            StatePopError::UpstreamUnavailable(_) | StatePopError::EmptyResult { .. }
        )
    }

    /// Short stable label for logs and the status endpoint
    pub fn kind(&self) -> &'static str {
        match self {
            StatePopError::UpstreamUnavailable(_) => "upstream_unavailable",
            StatePopError::EmptyResult { .. } => "empty_result",
            StatePopError::StoreHydration(_) => "store_hydration",
            StatePopError::NotFound(_) => "not_found",
            StatePopError::NoData => "no_data",
            StatePopError::Persist(_) => "persist",
            StatePopError::Config(_) => "config",
            StatePopError::Io(_) => "io",
        }
    }
}

/// Result type alias for statepop
pub type Result<T> = std::result::Result<T, StatePopError>;
