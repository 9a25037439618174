//! Scan persistence — scan rows, build steps, matches, high-watermarks,
//! and the best-match ranking shared with reporting projections.
//!
//! Writes that can race with a concurrent worker go through
//! `ON CONFLICT DO NOTHING`; match inserts, which have no unique
//! constraint to conflict on, are deduplicated against existing rows
//! instead.

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::error::ScanResult;
use crate::models::build_step::NewBuildStep;
use crate::models::matches::NewMatch;
use crate::models::scan::{NewScan, ScannedPattern};
use crate::schema::{build_steps, matches, patterns, scanned_patterns, scans};
use crate::services::matcher::LineMatch;

/// Open a scan batch stamped with the catalog's newest pattern id.
pub async fn open_scan(conn: &mut AsyncPgConnection, latest_pattern_id: i64) -> ScanResult<i64> {
    let scan_id = diesel::insert_into(scans::table)
        .values(&NewScan {
            timestamp: Utc::now(),
            latest_pattern_id,
        })
        .returning(scans::id)
        .get_result::<i64>(conn)
        .await?;

    tracing::info!(scan_id, latest_pattern_id, "Scan batch opened");
    Ok(scan_id)
}

/// Insert the failing-step row for a build, or return the existing one.
/// A null name records an idiopathic failure.
pub async fn ensure_build_step(
    conn: &mut AsyncPgConnection,
    build_num: i64,
    name: Option<&str>,
    is_timeout: bool,
) -> ScanResult<i64> {
    let inserted: Option<i64> = diesel::insert_into(build_steps::table)
        .values(&NewBuildStep {
            build: build_num,
            name: name.map(|s| s.to_string()),
            is_timeout,
        })
        .on_conflict_do_nothing()
        .returning(build_steps::id)
        .get_result(conn)
        .await
        .optional()?;

    if let Some(id) = inserted {
        return Ok(id);
    }

    // Lost an insert race; read the row the winner left behind.
    let existing = build_steps::table
        .filter(build_steps::build.eq(build_num))
        .filter(build_steps::name.is_not_distinct_from(name.map(|s| s.to_string())))
        .select(build_steps::id)
        .first(conn)
        .await?;
    Ok(existing)
}

/// Persist matcher output for a step, stamped with the scan batch.
///
/// The contract schema has no unique constraint on `matches`, so replay
/// protection is an application-level read: rows already present for a
/// (pattern, line, span) on this step are skipped. A build reprocessed
/// after a crash between this insert and its watermark advance inserts
/// nothing new.
pub async fn record_matches(
    conn: &mut AsyncPgConnection,
    scan_id: i64,
    build_step_id: i64,
    found: &[LineMatch],
) -> ScanResult<usize> {
    if found.is_empty() {
        return Ok(0);
    }

    let existing: HashSet<(i64, i32, i32)> = matches::table
        .filter(matches::build_step.eq(build_step_id))
        .select((matches::pattern, matches::line_number, matches::span_start))
        .load::<(i64, i32, i32)>(conn)
        .await?
        .into_iter()
        .collect();

    let rows: Vec<NewMatch> = found
        .iter()
        .filter(|m| !existing.contains(&(m.pattern_id, m.line_number as i32, m.span_start as i32)))
        .map(|m| NewMatch {
            build_step: build_step_id,
            pattern: m.pattern_id,
            line_number: m.line_number as i32,
            line_text: m.line_text.clone(),
            span_start: m.span_start as i32,
            span_end: m.span_end as i32,
            scan_id,
        })
        .collect();

    if rows.is_empty() {
        return Ok(0);
    }

    let inserted = diesel::insert_into(matches::table)
        .values(&rows)
        .execute(conn)
        .await?;

    crate::metrics::matches_recorded(inserted as u64);
    Ok(inserted)
}

/// Advance a build's high-watermark: assert it has now been scanned
/// against every pattern with id <= `newest_pattern`.
pub async fn advance_watermark(
    conn: &mut AsyncPgConnection,
    scan_id: i64,
    build_num: i64,
    newest_pattern: i64,
) -> ScanResult<()> {
    diesel::insert_into(scanned_patterns::table)
        .values(&ScannedPattern {
            scan: scan_id,
            newest_pattern,
            build: build_num,
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}

// ── Best-match ranking ──

/// A match joined with the pattern columns the tie-break order needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub match_id: i64,
    pub pattern_id: i64,
    pub specificity: i32,
    pub is_retired: bool,
    pub is_regex: bool,
}

/// The single deterministic "best pattern match" per build: specificity
/// DESC, is_retired ASC, is_regex ASC, pattern_id DESC, match id as the
/// final tie-break.
pub fn best_candidate(candidates: &[MatchCandidate]) -> Option<&MatchCandidate> {
    candidates.iter().min_by_key(|c| {
        (
            Reverse(c.specificity),
            c.is_retired,
            c.is_regex,
            Reverse(c.pattern_id),
            c.match_id,
        )
    })
}

/// Load a step's match candidates and rank them.
pub async fn best_match_for_step(
    conn: &mut AsyncPgConnection,
    build_step_id: i64,
) -> ScanResult<Option<MatchCandidate>> {
    let rows: Vec<(i64, i64, i32, bool, bool)> = matches::table
        .inner_join(patterns::table)
        .filter(matches::build_step.eq(build_step_id))
        .select((
            matches::id,
            patterns::id,
            patterns::specificity,
            patterns::is_retired,
            patterns::regex,
        ))
        .load(conn)
        .await?;

    let candidates: Vec<MatchCandidate> = rows
        .into_iter()
        .map(
            |(match_id, pattern_id, specificity, is_retired, is_regex)| MatchCandidate {
                match_id,
                pattern_id,
                specificity,
                is_retired,
                is_regex,
            },
        )
        .collect();

    Ok(best_candidate(&candidates).cloned())
}
