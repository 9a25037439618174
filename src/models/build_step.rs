//! build_steps — the failing step identified for a visited build.
//!
//! A null name marks an idiopathic failure (no attributable failing step).

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::build_steps;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = build_steps)]
pub struct BuildStep {
    pub id: i64,
    pub build: i64,
    pub name: Option<String>,
    pub is_timeout: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = build_steps)]
pub struct NewBuildStep {
    pub build: i64,
    pub name: Option<String>,
    pub is_timeout: bool,
}
