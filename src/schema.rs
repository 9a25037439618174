//! Diesel table definitions for the scan engine's persistence contract.
//!
//! Tables: builds, build_steps, patterns (with pattern_tags,
//! pattern_step_applicability, pattern_authorship side tables), matches,
//! log_metadata, scans, scanned_patterns. Names are shared with the
//! reporting projections and must not change.

diesel::table! {
    builds (build_num) {
        build_num -> Int8,
        vcs_revision -> Bpchar,
        queued_at -> Timestamptz,
        job_name -> Text,
        branch -> Varchar,
    }
}

diesel::table! {
    build_steps (id) {
        id -> Int8,
        build -> Int8,
        name -> Nullable<Text>,
        is_timeout -> Bool,
    }
}

diesel::table! {
    patterns (id) {
        id -> Int8,
        expression -> Text,
        regex -> Bool,
        has_nondeterministic_values -> Bool,
        description -> Text,
        specificity -> Int4,
        is_retired -> Bool,
        lines_from_end -> Nullable<Int4>,
    }
}

diesel::table! {
    pattern_tags (pattern, tag) {
        pattern -> Int8,
        tag -> Text,
    }
}

diesel::table! {
    pattern_step_applicability (pattern, step_name) {
        pattern -> Int8,
        step_name -> Text,
    }
}

diesel::table! {
    pattern_authorship (pattern) {
        pattern -> Int8,
        author -> Text,
        created -> Timestamptz,
    }
}

diesel::table! {
    matches (id) {
        id -> Int8,
        build_step -> Int8,
        pattern -> Int8,
        line_number -> Int4,
        line_text -> Text,
        span_start -> Int4,
        span_end -> Int4,
        scan_id -> Int8,
    }
}

diesel::table! {
    log_metadata (step) {
        step -> Int8,
        line_count -> Int4,
        byte_count -> Int4,
        content -> Text,
    }
}

diesel::table! {
    scans (id) {
        id -> Int8,
        timestamp -> Timestamptz,
        latest_pattern_id -> Int8,
    }
}

diesel::table! {
    scanned_patterns (scan, newest_pattern, build) {
        scan -> Int8,
        newest_pattern -> Int8,
        build -> Int8,
    }
}

// Foreign key relationships
diesel::joinable!(build_steps -> builds (build));
diesel::joinable!(pattern_tags -> patterns (pattern));
diesel::joinable!(pattern_step_applicability -> patterns (pattern));
diesel::joinable!(pattern_authorship -> patterns (pattern));
diesel::joinable!(matches -> build_steps (build_step));
diesel::joinable!(matches -> patterns (pattern));
diesel::joinable!(matches -> scans (scan_id));
diesel::joinable!(log_metadata -> build_steps (step));
diesel::joinable!(scans -> patterns (latest_pattern_id));
diesel::joinable!(scanned_patterns -> scans (scan));
diesel::joinable!(scanned_patterns -> builds (build));

diesel::allow_tables_to_appear_in_same_query!(
    builds,
    build_steps,
    patterns,
    pattern_tags,
    pattern_step_applicability,
    pattern_authorship,
    matches,
    log_metadata,
    scans,
    scanned_patterns,
);
