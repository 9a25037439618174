//! Scan planner — computes the unvisited and revisitable work queues.
//!
//! Pattern-id monotonicity reduces "which patterns still need to run
//! against this build" to an integer comparison against the build's
//! high-watermark.

use std::collections::{HashMap, HashSet};

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::ScanResult;
use crate::schema::{build_steps, builds, scanned_patterns};
use crate::services::pattern_store::PatternCatalog;

/// Batch scope: process up to N unvisited builds plus all revisitable
/// builds, or restrict both queues to an explicit build set.
#[derive(Debug, Clone)]
pub enum ScanPolicy {
    FetchLimit(usize),
    Whitelist(HashSet<i64>),
}

/// A previously visited build with patterns still pending against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisitCandidate {
    pub build_step_id: i64,
    pub step_name: String,
    pub build_num: i64,
    /// Pattern ids strictly greater than the build's high-watermark,
    /// ascending. Applicability filtering happens later, per build.
    pub pending: Vec<i64>,
}

/// Builds that have never been inspected: no `build_steps` row exists.
/// Ordered by build number descending; `FetchLimit` caps the count.
pub async fn unvisited_builds(
    conn: &mut AsyncPgConnection,
    policy: &ScanPolicy,
) -> ScanResult<Vec<i64>> {
    let mut query = builds::table
        .left_outer_join(build_steps::table)
        .filter(build_steps::id.is_null())
        .select(builds::build_num)
        .order(builds::build_num.desc())
        .into_boxed();

    match policy {
        ScanPolicy::FetchLimit(n) => query = query.limit(*n as i64),
        ScanPolicy::Whitelist(set) => {
            let allowed: Vec<i64> = set.iter().copied().collect();
            query = query.filter(builds::build_num.eq_any(allowed));
        }
    }

    Ok(query.load(conn).await?)
}

/// Builds that were visited with a scannable failing step but whose
/// high-watermark trails the catalog. Timeout and idiopathic steps are
/// excluded (they have no log).
pub async fn revisitable_builds(
    conn: &mut AsyncPgConnection,
    catalog: &PatternCatalog,
    policy: &ScanPolicy,
) -> ScanResult<Vec<RevisitCandidate>> {
    let mut step_query = build_steps::table
        .inner_join(builds::table)
        .filter(build_steps::name.is_not_null())
        .filter(build_steps::is_timeout.eq(false))
        .select((build_steps::id, build_steps::name, builds::build_num))
        .order(builds::build_num.desc())
        .into_boxed();

    if let ScanPolicy::Whitelist(set) = policy {
        let allowed: Vec<i64> = set.iter().copied().collect();
        step_query = step_query.filter(builds::build_num.eq_any(allowed));
    }

    let steps: Vec<(i64, Option<String>, i64)> = step_query.load(conn).await?;

    let marks: Vec<(i64, Option<i64>)> = scanned_patterns::table
        .group_by(scanned_patterns::build)
        .select((
            scanned_patterns::build,
            diesel::dsl::max(scanned_patterns::newest_pattern),
        ))
        .load(conn)
        .await?;
    let watermarks: HashMap<i64, i64> = marks
        .into_iter()
        .filter_map(|(build, mark)| mark.map(|m| (build, m)))
        .collect();

    Ok(compute_revisits(steps, &watermarks, catalog))
}

/// Merge step rows with per-build watermarks. A build never scanned has
/// watermark -1 and owes every catalog id; a build whose watermark has
/// caught up with the catalog is omitted.
pub fn compute_revisits(
    steps: Vec<(i64, Option<String>, i64)>,
    watermarks: &HashMap<i64, i64>,
    catalog: &PatternCatalog,
) -> Vec<RevisitCandidate> {
    steps
        .into_iter()
        .filter_map(|(build_step_id, name, build_num)| {
            let step_name = name?;
            let watermark = watermarks.get(&build_num).copied().unwrap_or(-1);
            let pending = catalog.ids_after(watermark);
            if pending.is_empty() {
                return None;
            }
            Some(RevisitCandidate {
                build_step_id,
                step_name,
                build_num,
                pending,
            })
        })
        .collect()
}
