//! patterns — the curated failure-pattern catalog and its side tables.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{pattern_step_applicability, pattern_tags, patterns};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = patterns)]
pub struct Pattern {
    pub id: i64,
    pub expression: String,
    pub regex: bool,
    pub has_nondeterministic_values: bool,
    pub description: String,
    pub specificity: i32,
    pub is_retired: bool,
    pub lines_from_end: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = pattern_tags)]
pub struct PatternTag {
    pub pattern: i64,
    pub tag: String,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = pattern_step_applicability)]
pub struct PatternStepApplicability {
    pub pattern: i64,
    pub step_name: String,
}
