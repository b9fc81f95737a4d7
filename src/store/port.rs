use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    identity::UserId,
    models::{Session, SessionType},
};

/// A session as it crosses the persistence boundary: timestamps stay as the
/// stored text until [`super::revalidate::revalidate_session`] checks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    pub id: String,
    pub user_id: String,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub duration: u64,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    #[serde(default)]
    pub pause_duration: u64,
}

impl From<&Session> for StoredSession {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            user_id: session.user_id.as_str().to_string(),
            start_time: session.start_time.to_rfc3339(),
            end_time: session.end_time.map(|dt| dt.to_rfc3339()),
            duration: session.duration,
            session_type: session.session_type,
            completed: session.completed,
            aborted: session.aborted,
            abort_reason: session.abort_reason.clone(),
            pause_duration: session.pause_duration,
        }
    }
}

/// Persistence port for per-user session logs. `load` returns the log in the
/// order it was saved; `save` replaces the user's whole log.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load(&self, user_id: &UserId) -> Result<Vec<StoredSession>>;

    async fn save(&self, user_id: &UserId, sessions: &[Session]) -> Result<()>;
}
