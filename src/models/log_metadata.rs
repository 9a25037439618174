//! log_metadata — the database tier of the log cache, one row per step.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::log_metadata;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = log_metadata)]
pub struct LogMetadata {
    pub step: i64,
    pub line_count: i32,
    pub byte_count: i32,
    pub content: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = log_metadata)]
pub struct NewLogMetadata {
    pub step: i64,
    pub line_count: i32,
    pub byte_count: i32,
    pub content: String,
}
