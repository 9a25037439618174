//! scans + scanned_patterns — scan batches and per-build high-watermarks.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{scanned_patterns, scans};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = scans)]
pub struct Scan {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub latest_pattern_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = scans)]
pub struct NewScan {
    pub timestamp: DateTime<Utc>,
    pub latest_pattern_id: i64,
}

/// Asserts that `build` has been scanned against every pattern with
/// id <= `newest_pattern`.
#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = scanned_patterns)]
pub struct ScannedPattern {
    pub scan: i64,
    pub newest_pattern: i64,
    pub build: i64,
}
