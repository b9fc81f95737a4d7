//! Boundary checks for sessions read back from persistence.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::{identity::UserId, models::Session};

use super::port::StoredSession;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Parses a stored timestamp. RFC 3339 is the written form; a zone-less
/// ISO 8601 value is read as UTC. Anything else is replaced by `fallback`
/// and reported in the log.
pub fn revalidate_timestamp(raw: &str, field: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Utc.from_utc_datetime(&naive);
    }

    log_warn!("invalid {field} '{raw}' in stored session; using current time");
    fallback
}

pub fn revalidate_session(stored: StoredSession, now: DateTime<Utc>) -> Session {
    Session {
        start_time: revalidate_timestamp(&stored.start_time, "startTime", now),
        end_time: stored
            .end_time
            .as_deref()
            .map(|raw| revalidate_timestamp(raw, "endTime", now)),
        id: stored.id,
        user_id: UserId::new(stored.user_id),
        duration: stored.duration,
        session_type: stored.session_type,
        completed: stored.completed,
        aborted: stored.aborted,
        abort_reason: stored.abort_reason,
        pause_duration: stored.pause_duration,
    }
}
