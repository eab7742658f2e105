//! Repository layer — entity-scoped database operations.

mod account;
mod history;
mod medical_record;

pub use account::*;
pub use history::*;
pub use medical_record::*;

use chrono::{DateTime, SecondsFormat, Utc};

use super::DatabaseError;

/// Fixed-width RFC 3339 so stored timestamps also sort lexicographically.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp '{raw}': {e}")))
}
