//! matches — one positive evaluation of a pattern against one log line.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::matches;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = matches)]
pub struct Match {
    pub id: i64,
    pub build_step: i64,
    pub pattern: i64,
    pub line_number: i32,
    pub line_text: String,
    pub span_start: i32,
    pub span_end: i32,
    pub scan_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = matches)]
pub struct NewMatch {
    pub build_step: i64,
    pub pattern: i64,
    pub line_number: i32,
    pub line_text: String,
    pub span_start: i32,
    pub span_end: i32,
    pub scan_id: i64,
}
