//! builds — one execution of a CI job, keyed by the provider's build number.
//!
//! Rows are created by the upstream ingest and immutable thereafter; the
//! engine only reads them.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::builds;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = builds)]
pub struct Build {
    pub build_num: i64,
    pub vcs_revision: String,
    pub queued_at: DateTime<Utc>,
    pub job_name: String,
    pub branch: String,
}
