//! Scan engine observability counters.

use metrics::{counter, gauge, histogram};

/// Record a visited build's terminal outcome.
pub fn build_visited(outcome: &str) {
    counter!("scan_builds_visited_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a completed revisit.
pub fn build_revisited() {
    counter!("scan_builds_revisited_total").increment(1);
}

/// Record a build skipped on a transient error.
pub fn build_skipped(kind: &'static str) {
    counter!("scan_builds_skipped_total", "kind" => kind).increment(1);
}

/// Record newly inserted match rows.
pub fn matches_recorded(count: u64) {
    counter!("scan_matches_recorded_total").increment(count);
}

/// Record a log acquisition, labelled by which tier satisfied it.
pub fn log_fetched(source: &'static str) {
    counter!("scan_logs_fetched_total", "source" => source).increment(1);
}

/// Record log download duration.
pub fn log_download_duration(duration_ms: u64) {
    histogram!("scan_log_download_ms").record(duration_ms as f64);
}

/// Set the size of the loaded pattern catalog.
pub fn catalog_loaded(count: usize) {
    gauge!("scan_pattern_catalog_size").set(count as f64);
}

/// Record a pattern excluded for the batch because it failed to compile.
pub fn pattern_compile_failed() {
    counter!("scan_pattern_compile_failures_total").increment(1);
}

/// Record an error by taxonomy kind.
pub fn scan_error(kind: &'static str) {
    counter!("scan_errors_total", "kind" => kind).increment(1);
}
