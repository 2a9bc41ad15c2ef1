//! Shared timestamp and event-id helpers.

use chrono::{DateTime, SecondsFormat, Utc};
use ulid::Ulid;

/// Current UTC time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// RFC3339 UTC timestamp with second precision (e.g. `2026-08-06T14:03:22Z`).
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}
