//! logsift — incremental scan engine for failed CI builds.
//!
//! Ingests failed builds from an upstream CI provider, downloads and
//! caches each build's console log, scans every line against a curated
//! failure-pattern catalog, and persists the matches so a front-end can
//! attribute each failure to a known cause. Scanning is incremental:
//! per-build high-watermarks ensure a build is only ever evaluated
//! against patterns it has not yet seen, and an interrupted batch
//! resumes where it left off.
//!
//! The crate is a library. The embedding process owns the CLI or HTTP
//! surface, installs the tracing subscriber, and wires up a metrics
//! exporter if it wants one.

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod schema;
pub mod services;

pub use config::ScanConfig;
pub use db::{connect, DbPool};
pub use error::{ScanError, ScanResult};
pub use services::ci_provider::HttpCiProvider;
pub use services::coordinator::{Coordinator, ScanSummary};
pub use services::log_cache::LogCache;
pub use services::pattern_store::{PatternCatalog, ScanPattern};
pub use services::planner::ScanPolicy;
