use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DedupeOutcome {
    pub records: Vec<Record>,
    /// Records dropped because a record with the same key came first.
    pub duplicates: usize,
    /// Records dropped because their identity key was empty.
    pub keyless: usize,
}

/// Collapse to one record per identity key (first seen wins), then order by
/// upload time, newest first. The sort is stable, so ties keep input order.
pub fn dedupe_and_sort(records: Vec<Record>) -> DedupeOutcome {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut outcome = DedupeOutcome {
        records: Vec::with_capacity(records.len()),
        ..DedupeOutcome::default()
    };

    for record in records {
        if !record.has_identity() {
            outcome.keyless += 1;
            continue;
        }
        if !seen.insert(record.id.clone()) {
            outcome.duplicates += 1;
            continue;
        }
        outcome.records.push(record);
    }

    outcome
        .records
        .sort_by_cached_key(|record| Reverse(upload_timestamp(&record.uploaded)));
    outcome
}

/// Parse an upstream upload timestamp into epoch seconds.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` and plain epoch
/// seconds. Anything else sorts as 0 (oldest).
pub fn upload_timestamp(uploaded: &str) -> i64 {
    let value = uploaded.trim();
    if value.is_empty() {
        return 0;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.timestamp();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return dt.and_utc().timestamp();
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
    }
    value.parse::<i64>().unwrap_or(0)
}
