//! Cross-component tests for the scan pipeline's pure layers: upstream
//! decode → canonical log text → catalog → matcher → watermark
//! arithmetic. Database-backed paths have inline `#[cfg(test)]` coverage
//! for their pure constituents in each service module.

use std::collections::HashMap;

use logsift::models::pattern::{Pattern, PatternStepApplicability};
use logsift::services::ci_provider::{failing_step, BuildInfo, LogChunk};
use logsift::services::log_cache::{byte_count, canonical_log_text, line_count};
use logsift::services::matcher::{first_capture_group, scan_log};
use logsift::services::pattern_store::{assemble_catalog, PatternCatalog, ScanPattern};
use logsift::services::planner::compute_revisits;

// ── Helpers ──

fn pattern_row(id: i64, expression: &str, regex: bool) -> Pattern {
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

fn applicability(pattern: i64, step_name: &str) -> PatternStepApplicability {
    PatternStepApplicability {
        pattern,
        step_name: step_name.to_string(),
    }
}

fn applicable<'a>(catalog: &'a PatternCatalog, ids: &[i64], step: &str) -> Vec<&'a ScanPattern> {
    catalog
        .subset(ids)
        .into_iter()
        .filter(|p| p.applies_to_step(step))
        .collect()
}

// ── Fresh scan of one failing build ──

#[test]
fn fresh_scan_of_one_build() {
    let info: BuildInfo = serde_json::from_str(
        r#"{"steps": [{"name": "compile",
                       "actions": [{"failed": true, "output_url": "u"}]}]}"#,
    )
    .unwrap();
    let step = failing_step(&info).expect("failing step");
    assert_eq!(step.step_name, "compile");
    assert!(!step.is_timeout);
    assert_eq!(step.output_url.as_deref(), Some("u"));

    let chunks: Vec<LogChunk> =
        serde_json::from_str(r#"[{"type": "out", "message": "hello\nERROR here\n"}]"#).unwrap();
    let text = canonical_log_text(&chunks);
    assert_eq!(line_count(&text), 2);
    assert_eq!(byte_count(&text), 17);

    let catalog = assemble_catalog(vec![pattern_row(1, "ERROR", false)], vec![], vec![]);
    let patterns = applicable(&catalog, &[1], "compile");
    let found = scan_log(&text, &patterns);

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pattern_id, 1);
    assert_eq!(found[0].line_number, 1);
    assert_eq!((found[0].span_start, found[0].span_end), (0, 5));
    assert_eq!(found[0].line_text, "ERROR here");
}

// ── Timeout and idiopathic builds produce nothing to scan ──

#[test]
fn timeout_build_is_terminal_without_scanning() {
    let info: BuildInfo = serde_json::from_str(
        r#"{"steps": [{"name": "compile", "actions": [{"timedout": true}]}]}"#,
    )
    .unwrap();
    let step = failing_step(&info).expect("failing step");
    assert!(step.is_timeout);

    // Timeout steps never enter the revisit queue.
    let catalog = assemble_catalog(vec![pattern_row(1, "ERROR", false)], vec![], vec![]);
    let revisits = compute_revisits(vec![], &HashMap::new(), &catalog);
    assert!(revisits.is_empty());
}

#[test]
fn idiopathic_build_has_no_failing_step() {
    let info: BuildInfo = serde_json::from_str(r#"{"steps": []}"#).unwrap();
    assert!(failing_step(&info).is_none());
}

// ── Revisit after a new pattern is added ──

#[test]
fn revisit_applies_only_the_new_pattern() {
    let catalog = assemble_catalog(
        vec![
            pattern_row(1, "ERROR", false),
            pattern_row(2, r"ERROR (\w+)", true),
        ],
        vec![],
        vec![applicability(2, "compile")],
    );

    // Build 42 was scanned at watermark 1; only pattern 2 is pending.
    let watermarks = HashMap::from([(42, 1)]);
    let revisits = compute_revisits(
        vec![(7, Some("compile".to_string()), 42)],
        &watermarks,
        &catalog,
    );
    assert_eq!(revisits.len(), 1);
    assert_eq!(revisits[0].pending, vec![2]);

    let patterns = applicable(&catalog, &revisits[0].pending, "compile");
    let found = scan_log("hello\nERROR here\n", &patterns);

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pattern_id, 2);
    assert_eq!(found[0].line_number, 1);
    assert_eq!((found[0].span_start, found[0].span_end), (0, 10));

    let newest = revisits[0].pending.iter().copied().max().unwrap();
    assert_eq!(newest, 2);
}

// ── Applicability filter vs the high-watermark ──

#[test]
fn inapplicable_pattern_still_advances_the_watermark() {
    let catalog = assemble_catalog(
        vec![
            pattern_row(1, "ERROR", false),
            pattern_row(2, r"ERROR (\w+)", true),
            pattern_row(3, "lint warning", false),
        ],
        vec![],
        vec![applicability(2, "compile"), applicability(3, "lint")],
    );

    let watermarks = HashMap::from([(42, 2)]);
    let revisits = compute_revisits(
        vec![(7, Some("compile".to_string()), 42)],
        &watermarks,
        &catalog,
    );
    assert_eq!(revisits[0].pending, vec![3]);

    // Pattern 3 is restricted to "lint", so nothing matches on "compile"…
    let patterns = applicable(&catalog, &revisits[0].pending, "compile");
    assert!(patterns.is_empty());

    // …but the watermark still covers the whole pending range.
    let newest = revisits[0].pending.iter().copied().max().unwrap();
    assert_eq!(newest, 3);

    // Once advanced to 3, the build owes nothing more.
    let caught_up = HashMap::from([(42, 3)]);
    let after = compute_revisits(
        vec![(7, Some("compile".to_string()), 42)],
        &caught_up,
        &catalog,
    );
    assert!(after.is_empty());
}

// ── Only "out" chunks feed the canonical text ──

#[test]
fn log_payload_filters_non_out_chunks() {
    let chunks: Vec<LogChunk> = serde_json::from_str(
        r#"[{"type": "out", "message": "a\n"},
            {"type": "err", "message": "IGNORED\n"},
            {"type": "out", "message": "b\n"}]"#,
    )
    .unwrap();
    assert_eq!(canonical_log_text(&chunks), "a\nb\n");
}

// ── Capture-group side API for test-failure extraction ──

#[test]
fn capture_group_extracts_failing_test_name() {
    let re = regex::Regex::new(r"ERROR (\w+)").unwrap();
    assert_eq!(
        first_capture_group("ERROR here", &re).as_deref(),
        Some("here")
    );
}
