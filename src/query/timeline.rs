// src/query/timeline.rs

//! Timeline ordering for timeline-kind plugins.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::artefacts::ArtefactRecord;

/// Column the timeline is ordered by.
pub const CREATED_DATE_FIELD: &str = "Created Date";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    /// Parsed `Created Date`; `None` when missing or unparseable.
    pub created_at: Option<DateTime<Utc>>,
    pub record: ArtefactRecord,
}

/// Parse the timestamp formats the analysis engine emits. Naive
/// timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = raw.strip_suffix("UTC").map_or(raw, str::trim_end);
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|ts| ts.and_utc())
}

/// Order records by creation date; undated entries go last and equal keys
/// keep their storage order.
pub fn build_timeline(records: Vec<ArtefactRecord>) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = records
        .into_iter()
        .map(|record| TimelineEntry {
            created_at: record
                .payload
                .get(CREATED_DATE_FIELD)
                .and_then(|v| v.as_str())
                .and_then(parse_timestamp),
            record,
        })
        .collect();

    entries.sort_by_key(|e| (e.created_at.is_none(), e.created_at));
    entries
}
