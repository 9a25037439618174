//! Pattern matcher — pure evaluation of a pattern set over log lines.
//!
//! Applicability filtering happens in the caller; the matcher applies
//! every pattern it is given.

use regex::Regex;

use crate::services::pattern_store::{CompiledExpr, ScanPattern};

/// One positive evaluation of a pattern against one log line. Spans are
/// byte offsets into the whitespace-stripped line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineMatch {
    pub pattern_id: i64,
    pub line_number: usize,
    pub line_text: String,
    pub span_start: usize,
    pub span_end: usize,
}

/// Scan enumerated lines. `lines` must be the log's lines in order; the
/// `lines_from_end` window is measured from the end of the slice. Output
/// is ordered by (line_number ASC, pattern_id ASC), with at most one
/// match per (line, pattern).
pub fn scan_lines(lines: &[(usize, &str)], patterns: &[&ScanPattern]) -> Vec<LineMatch> {
    let mut sorted: Vec<&ScanPattern> = patterns.to_vec();
    sorted.sort_by_key(|p| p.id);

    let total = lines.len();
    let mut out = Vec::new();

    for (pos, (line_number, raw)) in lines.iter().copied().enumerate() {
        let text = raw.trim_end();

        for pattern in &sorted {
            if let Some(window) = pattern.lines_from_end {
                if pos < total.saturating_sub(window) {
                    continue;
                }
            }

            let span = match &pattern.expr {
                CompiledExpr::Literal(needle) => text
                    .find(needle.as_str())
                    .map(|start| (start, start + needle.len())),
                CompiledExpr::Regex(re) => re.find(text).map(|m| (m.start(), m.end())),
            };

            if let Some((span_start, span_end)) = span {
                out.push(LineMatch {
                    pattern_id: pattern.id,
                    line_number,
                    line_text: text.to_string(),
                    span_start,
                    span_end,
                });
            }
        }
    }

    out
}

/// Scan a whole log text, enumerating lines zero-based.
pub fn scan_log(text: &str, patterns: &[&ScanPattern]) -> Vec<LineMatch> {
    let lines: Vec<(usize, &str)> = text.lines().enumerate().collect();
    scan_lines(&lines, patterns)
}

/// First capture group of the pattern's first match in `text`, used by the
/// test-failure extraction path.
pub fn first_capture_group(text: &str, pattern: &Regex) -> Option<String> {
    pattern
        .captures(text)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn literal(id: i64, needle: &str) -> ScanPattern {
        ScanPattern {
            id,
            expr: CompiledExpr::Literal(needle.to_string()),
            description: String::new(),
            tags: HashSet::new(),
            applicable_steps: HashSet::new(),
            specificity: 1,
            is_retired: false,
            is_nondeterministic: false,
            lines_from_end: None,
        }
    }

    fn regex(id: i64, expression: &str) -> ScanPattern {
        ScanPattern {
            expr: CompiledExpr::Regex(Regex::new(expression).unwrap()),
            ..literal(id, "")
        }
    }

    #[test]
    fn literal_match_spans_first_occurrence() {
        let p = literal(1, "ERROR");
        let found = scan_log("hello\nERROR here\n", &[&p]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_number, 1);
        assert_eq!((found[0].span_start, found[0].span_end), (0, 5));
        assert_eq!(found[0].line_text, "ERROR here");
    }

    #[test]
    fn regex_match_spans_overall_match() {
        let p = regex(2, r"ERROR (\w+)");
        let found = scan_log("hello\nERROR here\n", &[&p]);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].span_start, found[0].span_end), (0, 10));
    }

    #[test]
    fn trailing_whitespace_is_stripped_before_matching() {
        let p = regex(1, r"failed$");
        let found = scan_log("build failed   \n", &[&p]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_text, "build failed");
        assert_eq!((found[0].span_start, found[0].span_end), (6, 12));
    }

    #[test]
    fn at_most_one_match_per_line_and_pattern() {
        let p = literal(1, "x");
        let found = scan_log("x x x\n", &[&p]);
        assert_eq!(found.len(), 1);
        assert_eq!((found[0].span_start, found[0].span_end), (0, 1));
    }

    #[test]
    fn output_ordered_by_line_then_pattern_id() {
        let a = literal(5, "a");
        let b = literal(2, "a");
        let found = scan_log("a\na\n", &[&a, &b]);
        let keys: Vec<(usize, i64)> = found
            .iter()
            .map(|m| (m.line_number, m.pattern_id))
            .collect();
        assert_eq!(keys, vec![(0, 2), (0, 5), (1, 2), (1, 5)]);
    }

    #[test]
    fn lines_from_end_restricts_window() {
        let mut p = literal(1, "retry");
        p.lines_from_end = Some(2);
        let found = scan_log("retry\nok\nretry\nretry\n", &[&p]);
        let lines: Vec<usize> = found.iter().map(|m| m.line_number).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn oversized_lines_from_end_covers_whole_log() {
        let mut p = literal(1, "retry");
        p.lines_from_end = Some(100);
        let found = scan_log("retry\nretry\n", &[&p]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn empty_log_yields_no_matches() {
        let p = literal(1, "ERROR");
        assert!(scan_log("", &[&p]).is_empty());
    }

    #[test]
    fn capture_group_extraction() {
        let re = Regex::new(r"FAILED: (\S+)").unwrap();
        assert_eq!(
            first_capture_group("FAILED: test_foo (suite)", &re).as_deref(),
            Some("test_foo")
        );
        assert_eq!(first_capture_group("all green", &re), None);
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn spans_are_within_the_stripped_line(
                text in "[ -~\\n]{0,200}",
                needle in "[a-z]{1,4}",
            ) {
                let p = literal(1, &needle);
                for m in scan_log(&text, &[&p]) {
                    prop_assert!(m.span_start < m.span_end);
                    prop_assert!(m.span_end <= m.line_text.len());
                    prop_assert_eq!(&m.line_text[m.span_start..m.span_end], needle.as_str());
                }
            }

            #[test]
            fn output_is_deterministic_and_sorted(
                text in "[a-z \\n]{0,200}",
                ids in proptest::collection::vec(1_i64..50, 1..5),
            ) {
                let patterns: Vec<ScanPattern> =
                    ids.iter().map(|id| literal(*id, "a")).collect();
                let refs: Vec<&ScanPattern> = patterns.iter().collect();

                let first = scan_log(&text, &refs);
                let second = scan_log(&text, &refs);
                prop_assert_eq!(&first, &second);

                let keys: Vec<(usize, i64)> =
                    first.iter().map(|m| (m.line_number, m.pattern_id)).collect();
                let mut sorted_keys = keys.clone();
                sorted_keys.sort();
                prop_assert_eq!(keys, sorted_keys);
            }
        }
    }
}
