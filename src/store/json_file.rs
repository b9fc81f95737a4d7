use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::{identity::UserId, models::Session};

use super::port::{SessionRepository, StoredSession};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_warn};

/// Session logs kept as one pretty-printed JSON array per user.
pub struct JsonFileRepository {
    dir: PathBuf,
}

impl JsonFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// One file per user. The id is hex-encoded so distinct ids never share a
    /// file, whatever characters they contain or how the filesystem folds case.
    fn path_for(&self, user_id: &UserId) -> PathBuf {
        let encoded: String = user_id
            .as_str()
            .bytes()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        self.dir.join(format!("focusflow_sessions_{encoded}.json"))
    }

    /// Keeps a copy of a log that had unreadable records, so the next full
    /// save does not erase the only copy of them.
    async fn preserve_unreadable(&self, path: &Path, contents: &str) {
        let backup = path.with_extension(format!(
            "unreadable-{}.json",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        match tokio::fs::write(&backup, contents).await {
            Ok(()) => log_warn!("kept a copy of {} at {}", path.display(), backup.display()),
            Err(err) => log_error!("failed to back up {}: {err}", path.display()),
        }
    }
}

#[async_trait]
impl SessionRepository for JsonFileRepository {
    async fn load(&self, user_id: &UserId) -> Result<Vec<StoredSession>> {
        let path = self.path_for(user_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let Value::Array(records) = value else {
            bail!("{} does not contain a session list", path.display());
        };

        let mut sessions = Vec::with_capacity(records.len());
        let mut unreadable = 0;
        for (index, record) in records.into_iter().enumerate() {
            match serde_json::from_value::<StoredSession>(record) {
                Ok(session) if session.user_id == user_id.as_str() => sessions.push(session),
                Ok(session) => log_warn!(
                    "ignoring session {} owned by another user in {}",
                    session.id,
                    path.display()
                ),
                Err(err) => {
                    unreadable += 1;
                    log_warn!(
                        "skipping malformed session #{index} in {}: {err}",
                        path.display()
                    );
                }
            }
        }
        if unreadable > 0 {
            self.preserve_unreadable(&path, &contents).await;
        }

        log_debug!("loaded {} sessions from {}", sessions.len(), path.display());
        Ok(sessions)
    }

    async fn save(&self, user_id: &UserId, sessions: &[Session]) -> Result<()> {
        let path = self.path_for(user_id);
        let records: Vec<StoredSession> = sessions.iter().map(StoredSession::from).collect();
        let serialized = serde_json::to_string_pretty(&records)?;

        // Write-then-rename so an interrupted save never truncates the log.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}
