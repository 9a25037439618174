//! Pattern store — loads the failure-pattern catalog once per scan batch.
//!
//! Patterns change rarely relative to scan volume; loading a single
//! immutable snapshot avoids per-build queries and keeps every match in a
//! batch referencing a consistent catalog.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use regex::Regex;

use crate::error::ScanResult;
use crate::models::pattern::{Pattern, PatternStepApplicability, PatternTag};
use crate::schema::{pattern_step_applicability, pattern_tags, patterns};

#[derive(Debug, Clone)]
pub enum CompiledExpr {
    Literal(String),
    Regex(Regex),
}

/// One catalog entry with its expression pre-compiled.
#[derive(Debug, Clone)]
pub struct ScanPattern {
    pub id: i64,
    pub expr: CompiledExpr,
    pub description: String,
    pub tags: HashSet<String>,
    /// Step names this pattern is restricted to; empty = applies to all.
    pub applicable_steps: HashSet<String>,
    pub specificity: i32,
    pub is_retired: bool,
    pub is_nondeterministic: bool,
    /// When set, the pattern is applied only to the last N lines of a log.
    pub lines_from_end: Option<usize>,
}

impl ScanPattern {
    pub fn is_regex(&self) -> bool {
        matches!(self.expr, CompiledExpr::Regex(_))
    }

    pub fn applies_to_step(&self, step_name: &str) -> bool {
        self.applicable_steps.is_empty() || self.applicable_steps.contains(step_name)
    }
}

/// Immutable catalog snapshot for one scan batch.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    compiled: BTreeMap<i64, ScanPattern>,
    /// Every persisted pattern id, including ones whose expression failed
    /// to compile. High-watermark arithmetic runs over this set so a
    /// broken pattern cannot pin a build in the revisit queue forever.
    ids: BTreeSet<i64>,
}

impl PatternCatalog {
    /// Largest persisted pattern id, or -1 for an empty catalog.
    pub fn latest_pattern_id(&self) -> i64 {
        self.ids.iter().next_back().copied().unwrap_or(-1)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&ScanPattern> {
        self.compiled.get(&id)
    }

    /// All compiled patterns in ascending id order.
    pub fn all(&self) -> impl Iterator<Item = &ScanPattern> {
        self.compiled.values()
    }

    /// Compiled patterns from the given id list, ascending by id.
    /// Uncompilable ids are silently absent.
    pub fn subset(&self, ids: &[i64]) -> Vec<&ScanPattern> {
        let mut sorted: Vec<i64> = ids.to_vec();
        sorted.sort_unstable();
        sorted
            .into_iter()
            .filter_map(|id| self.compiled.get(&id))
            .collect()
    }

    /// Every persisted id strictly greater than the watermark, ascending.
    pub fn ids_after(&self, watermark: i64) -> Vec<i64> {
        self.ids
            .iter()
            .copied()
            .filter(|id| *id > watermark)
            .collect()
    }
}

/// Assemble a catalog from loaded rows. Pure; compile failures are logged,
/// counted, and excluded from matching while still advancing `latest`.
pub fn assemble_catalog(
    rows: Vec<Pattern>,
    tags: Vec<PatternTag>,
    applicability: Vec<PatternStepApplicability>,
) -> PatternCatalog {
    let mut tags_by_pattern: HashMap<i64, HashSet<String>> = HashMap::new();
    for t in tags {
        tags_by_pattern.entry(t.pattern).or_default().insert(t.tag);
    }

    let mut steps_by_pattern: HashMap<i64, HashSet<String>> = HashMap::new();
    for a in applicability {
        steps_by_pattern
            .entry(a.pattern)
            .or_default()
            .insert(a.step_name);
    }

    let mut catalog = PatternCatalog::default();
    for row in rows {
        catalog.ids.insert(row.id);

        let expr = if row.regex {
            match Regex::new(&row.expression) {
                Ok(re) => CompiledExpr::Regex(re),
                Err(e) => {
                    tracing::warn!(
                        pattern_id = row.id,
                        expression = %row.expression,
                        error = %e,
                        "Pattern failed to compile, excluded from this batch"
                    );
                    crate::metrics::pattern_compile_failed();
                    continue;
                }
            }
        } else {
            CompiledExpr::Literal(row.expression)
        };

        catalog.compiled.insert(
            row.id,
            ScanPattern {
                id: row.id,
                expr,
                description: row.description,
                tags: tags_by_pattern.remove(&row.id).unwrap_or_default(),
                applicable_steps: steps_by_pattern.remove(&row.id).unwrap_or_default(),
                specificity: row.specificity,
                is_retired: row.is_retired,
                is_nondeterministic: row.has_nondeterministic_values,
                lines_from_end: row.lines_from_end.and_then(|n| usize::try_from(n).ok()),
            },
        );
    }

    crate::metrics::catalog_loaded(catalog.len());
    catalog
}

/// Load the full catalog: patterns plus tag and applicability side tables.
pub async fn load(conn: &mut AsyncPgConnection) -> ScanResult<PatternCatalog> {
    let rows: Vec<Pattern> = patterns::table
        .order(patterns::id.asc())
        .load(conn)
        .await?;
    let tags: Vec<PatternTag> = pattern_tags::table.load(conn).await?;
    let applicability: Vec<PatternStepApplicability> =
        pattern_step_applicability::table.load(conn).await?;

    let catalog = assemble_catalog(rows, tags, applicability);
    tracing::info!(
        patterns = catalog.len(),
        latest = catalog.latest_pattern_id(),
        "Pattern catalog loaded"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, expression: &str, regex: bool) -> Pattern {
        Pattern {
            id,
            expression: expression.to_string(),
            regex,
            has_nondeterministic_values: false,
            description: format!("pattern {id}"),
            specificity: 1,
            is_retired: false,
            lines_from_end: None,
        }
    }

    #[test]
    fn assembles_tags_and_applicability() {
        let catalog = assemble_catalog(
            vec![row(1, "ERROR", false), row(2, r"ERROR (\w+)", true)],
            vec![
                PatternTag {
                    pattern: 1,
                    tag: "infra".into(),
                },
                PatternTag {
                    pattern: 1,
                    tag: "flaky".into(),
                },
            ],
            vec![PatternStepApplicability {
                pattern: 2,
                step_name: "compile".into(),
            }],
        );

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.latest_pattern_id(), 2);

        let p1 = catalog.get(1).unwrap();
        assert!(!p1.is_regex());
        assert_eq!(p1.tags.len(), 2);
        assert!(p1.applicable_steps.is_empty());
        assert!(p1.applies_to_step("anything"));
        assert!(p1.applies_to_step(""));

        let p2 = catalog.get(2).unwrap();
        assert!(p2.is_regex());
        assert!(p2.applies_to_step("compile"));
        assert!(!p2.applies_to_step("lint"));
    }

    #[test]
    fn compile_failure_is_excluded_but_still_advances_latest() {
        let catalog = assemble_catalog(
            vec![row(1, "ERROR", false), row(7, r"unclosed (group", true)],
            vec![],
            vec![],
        );
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get(7).is_none());
        assert_eq!(catalog.latest_pattern_id(), 7);
        assert_eq!(catalog.ids_after(1), vec![7]);
    }

    #[test]
    fn empty_catalog_has_sentinel_watermark() {
        let catalog = assemble_catalog(vec![], vec![], vec![]);
        assert_eq!(catalog.latest_pattern_id(), -1);
        assert!(catalog.ids_after(-1).is_empty());
    }

    #[test]
    fn subset_is_sorted_and_skips_unknown_ids() {
        let catalog = assemble_catalog(
            vec![row(3, "a", false), row(5, "b", false), row(9, "c", false)],
            vec![],
            vec![],
        );
        let subset = catalog.subset(&[9, 3, 4]);
        let ids: Vec<i64> = subset.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 9]);
    }
}
