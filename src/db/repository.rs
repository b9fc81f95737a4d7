use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, types::ValueRef, Row};

use crate::{
    db::{
        helpers::{to_i64, to_u64},
        Database,
    },
    identity::UserId,
    models::{Session, SessionType},
    store::{SessionRepository, StoredSession},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

fn row_to_stored(row: &Row) -> Result<StoredSession> {
    let duration: i64 = row.get("duration")?;
    let pause_duration: i64 = row.get("pause_duration")?;
    let session_type: String = row.get("session_type")?;

    Ok(StoredSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        duration: to_u64(duration, "duration")?,
        session_type: SessionType::parse(&session_type)
            .ok_or_else(|| anyhow!("unknown session type '{session_type}'"))?,
        completed: row.get("completed")?,
        aborted: row.get("aborted")?,
        abort_reason: row.get("abort_reason")?,
        pause_duration: to_u64(pause_duration, "pause_duration")?,
    })
}

/// Text dump of a row that did not parse, kept for manual recovery.
fn raw_row(row: &Row) -> String {
    (0..row.as_ref().column_count())
        .map(|index| {
            let name = row.as_ref().column_name(index).unwrap_or("?");
            let value = match row.get_ref(index) {
                Ok(ValueRef::Null) => "NULL".to_string(),
                Ok(ValueRef::Integer(v)) => v.to_string(),
                Ok(ValueRef::Real(v)) => v.to_string(),
                Ok(ValueRef::Text(v)) | Ok(ValueRef::Blob(v)) => {
                    String::from_utf8_lossy(v).into_owned()
                }
                Err(_) => "?".to_string(),
            };
            format!("{name}={value}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Session logs kept in the `sessions` table, one ordered set of rows per user.
pub struct SqliteSessionRepository {
    db: Database,
}

impl SqliteSessionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn load(&self, user_id: &UserId) -> Result<Vec<StoredSession>> {
        let user = user_id.as_str().to_string();
        self.db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                let mut sessions = Vec::new();
                let mut unreadable = Vec::new();
                {
                    let mut stmt = tx.prepare(
                        "SELECT id, user_id, start_time, end_time, duration, session_type,
                                completed, aborted, abort_reason, pause_duration
                         FROM sessions
                         WHERE user_id = ?1
                         ORDER BY position ASC",
                    )?;
                    let mut rows = stmt.query(params![user])?;
                    while let Some(row) = rows.next()? {
                        match row_to_stored(row) {
                            Ok(session) => sessions.push(session),
                            Err(err) => unreadable.push((row.get::<_, String>("id")?, raw_row(row), err)),
                        }
                    }
                }

                // Saves replace the whole log, so unreadable rows are moved out
                // of `sessions` before anything can overwrite them.
                for (id, raw, err) in &unreadable {
                    log_warn!("moving malformed session row {id} for {user} aside: {err:#}");
                    tx.execute(
                        "INSERT INTO unreadable_sessions (user_id, id, raw_row, error, moved_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![user, id, raw, format!("{err:#}"), Utc::now().to_rfc3339()],
                    )?;
                    tx.execute(
                        "DELETE FROM sessions WHERE user_id = ?1 AND id = ?2",
                        params![user, id],
                    )?;
                }
                tx.commit().context("failed to commit session load")?;

                log_debug!("loaded {} sessions for {user}", sessions.len());
                Ok(sessions)
            })
            .await
    }

    async fn save(&self, user_id: &UserId, sessions: &[Session]) -> Result<()> {
        let user = user_id.as_str().to_string();
        let records: Vec<StoredSession> = sessions.iter().map(StoredSession::from).collect();

        self.db
            .execute(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![user])?;
                {
                    let mut insert = tx.prepare(
                        "INSERT OR REPLACE INTO sessions (user_id, position, id, start_time, end_time,
                             duration, session_type, completed, aborted, abort_reason, pause_duration)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    )?;
                    for (position, record) in records.iter().enumerate() {
                        insert
                            .execute(params![
                                user,
                                to_i64(position as u64)?,
                                record.id,
                                record.start_time,
                                record.end_time,
                                to_i64(record.duration)?,
                                record.session_type.as_str(),
                                record.completed,
                                record.aborted,
                                record.abort_reason,
                                to_i64(record.pause_duration)?,
                            ])
                            .with_context(|| format!("failed to insert session {}", record.id))?;
                    }
                }
                tx.commit().context("failed to commit session log")?;
                Ok(())
            })
            .await
    }
}
