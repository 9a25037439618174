//! Scan engine configuration — loaded from environment variables.

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// CI provider base URL; build metadata lives at `<base>/<build_num>`.
    pub ci_base_url: String,
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Root directory of the local log cache.
    pub cache_dir: PathBuf,
    /// Per-request timeout for CI provider calls, in seconds.
    pub request_timeout_secs: u64,
    /// Bounded worker pool size for the per-build loops; 1 = sequential.
    pub worker_count: usize,
    /// Maximum database connections held by the engine.
    pub db_pool_size: usize,
}

impl ScanConfig {
    pub fn from_env() -> Self {
        let ci_base_url = std::env::var("SCAN_CI_BASE_URL").unwrap_or_default();
        let database_url = std::env::var("DATABASE_URL").unwrap_or_default();
        let cache_dir = std::env::var("SCAN_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./log-cache"));
        let request_timeout_secs = std::env::var("SCAN_REQUEST_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let worker_count = std::env::var("SCAN_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);
        let db_pool_size = std::env::var("SCAN_DB_POOL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8);

        if ci_base_url.is_empty() {
            tracing::warn!("SCAN_CI_BASE_URL not set -- build metadata fetches will fail");
        }
        if database_url.is_empty() {
            tracing::warn!("DATABASE_URL not set -- persistence will fail");
        }

        Self {
            ci_base_url,
            database_url,
            cache_dir,
            request_timeout_secs,
            worker_count: worker_count.max(1),
            db_pool_size: db_pool_size.max(1),
        }
    }
}
