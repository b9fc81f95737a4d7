//! Session data model shared by the timer, the session store and the
//! persistence adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// Reason recorded on an aborted session when the caller gives none.
pub const DEFAULT_ABORT_REASON: &str = "Manually stopped";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    Work,
    Break,
    LongBreak,
}

impl Default for SessionType {
    fn default() -> Self {
        SessionType::Work
    }
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Work => "work",
            SessionType::Break => "break",
            SessionType::LongBreak => "longBreak",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "work" => Some(SessionType::Work),
            "break" => Some(SessionType::Break),
            "longBreak" => Some(SessionType::LongBreak),
            _ => None,
        }
    }
}

/// One timed interval of focus or rest.
///
/// `end_time` is only set once the session is finalized. A finalized session
/// has exactly one of `completed` / `aborted` set; both are false while the
/// session is still in progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Planned length in seconds.
    pub duration: u64,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub completed: bool,
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Seconds spent paused.
    pub pause_duration: u64,
}

impl Session {
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Seconds actually spent in the session, excluding pauses. In-progress
    /// sessions report zero.
    pub fn active_secs(&self) -> u64 {
        match self.end_time {
            Some(end) => {
                let elapsed = (end - self.start_time).num_seconds().max(0) as u64;
                elapsed.saturating_sub(self.pause_duration)
            }
            None => 0,
        }
    }
}
