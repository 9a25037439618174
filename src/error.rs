//! Scan engine error taxonomy.
//!
//! Errors are recovered at the per-build boundary whenever possible; only
//! catalog-load and database-connectivity failures abort a whole batch.

use thiserror::Error;

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Transport failure, HTTP non-2xx, or request timeout against the
    /// CI provider. Transient: the build is skipped and retried next batch.
    #[error("network failure during {context}: {source}")]
    Network {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Upstream returned a payload the typed decoders cannot read.
    /// Transient, but logged loudly.
    #[error("malformed upstream payload during {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The build's failing step was a timeout or carried no output URL;
    /// there is nothing to scan for this build.
    #[error("no log available for build {build_num}")]
    NoLogAvailable { build_num: i64 },

    /// Database failure. Connectivity problems abort the batch; constraint
    /// conflicts are absorbed by `ON CONFLICT DO NOTHING` writes before
    /// they surface here.
    #[error("database failure: {0}")]
    Persistence(#[from] diesel::result::Error),

    /// Could not check a connection out of the pool. Aborts the batch.
    #[error("database pool: {0}")]
    Pool(String),

    /// A catalog expression failed to compile; the pattern is excluded
    /// from the batch.
    #[error("pattern {pattern_id} failed to compile: {source}")]
    PatternCompile {
        pattern_id: i64,
        #[source]
        source: regex::Error,
    },

    /// Local log cache I/O fault. Transient for the affected build.
    #[error("log cache I/O: {0}")]
    Cache(#[from] std::io::Error),
}

impl ScanError {
    /// Whether the batch as a whole must stop (database connectivity) as
    /// opposed to skipping the affected build.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, ScanError::Persistence(_) | ScanError::Pool(_))
    }

    /// Stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Network { .. } => "network",
            ScanError::Decode { .. } => "decode",
            ScanError::NoLogAvailable { .. } => "no_log",
            ScanError::Persistence(_) => "persistence",
            ScanError::Pool(_) => "pool",
            ScanError::PatternCompile { .. } => "pattern_compile",
            ScanError::Cache(_) => "cache",
        }
    }
}
