pub mod json_file;
pub mod port;
pub mod revalidate;

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    clock::SessionClock,
    identity::UserId,
    models::{Session, SessionType, DEFAULT_ABORT_REASON},
};

pub use json_file::JsonFileRepository;
pub use port::{SessionRepository, StoredSession};
pub use revalidate::{revalidate_session, revalidate_timestamp};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Owns the signed-in user's session log and the session in progress.
///
/// Every append is written through to the repository. Without a user no
/// session is created and nothing is persisted. Saves replace the whole
/// persisted log, so nothing is written for a user whose log could not be
/// read until a later load succeeds.
pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    clock: SessionClock,
    user_id: Option<UserId>,
    current: Option<Session>,
    sessions: Vec<Session>,
    work_session_count: u32,
    /// False while the user's persisted log has not been read successfully.
    log_loaded: bool,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>, clock: SessionClock) -> Self {
        Self {
            repository,
            clock,
            user_id: None,
            current: None,
            sessions: Vec::new(),
            work_session_count: 0,
            log_loaded: false,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    /// Work sessions started since this store was created or the user last
    /// changed.
    pub fn work_session_count(&self) -> u32 {
        self.work_session_count
    }

    /// Replaces the in-memory state with `user_id`'s persisted log. Clearing
    /// the user empties the in-memory log; the persisted copy is untouched.
    pub async fn switch_user(&mut self, user_id: Option<UserId>) {
        self.current = None;
        self.sessions.clear();
        self.work_session_count = 0;
        self.log_loaded = false;
        self.user_id = user_id;

        let Some(user) = self.user_id.clone() else {
            return;
        };

        match self.repository.load(&user).await {
            Ok(stored) => {
                self.sessions = self.restore(stored);
                self.log_loaded = true;
                log_info!("loaded {} sessions for {user}", self.sessions.len());
            }
            Err(err) => {
                log_warn!("could not load sessions for {user}, starting empty: {err:#}");
            }
        }
    }

    fn restore(&self, stored: Vec<StoredSession>) -> Vec<Session> {
        let now = self.clock.now();
        stored
            .into_iter()
            .map(|record| revalidate_session(record, now))
            .collect()
    }

    /// Starts a new current session. Work sessions advance the work counter
    /// whether or not a user is signed in; the record itself is only created
    /// for a known user.
    pub fn create_session(&mut self, session_type: SessionType, duration: u64) -> Option<Session> {
        if session_type == SessionType::Work {
            self.work_session_count += 1;
        }

        let user_id = self.user_id.clone()?;
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            start_time: self.clock.now(),
            end_time: None,
            duration,
            session_type,
            completed: false,
            aborted: false,
            abort_reason: None,
            pause_duration: 0,
        };
        self.current = Some(session.clone());
        Some(session)
    }

    pub async fn complete_session(&mut self, pause_duration: u64) -> Option<Session> {
        self.finalize(pause_duration, None).await
    }

    pub async fn abort_session(
        &mut self,
        pause_duration: u64,
        reason: Option<String>,
    ) -> Option<Session> {
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ABORT_REASON.to_string());
        self.finalize(pause_duration, Some(reason)).await
    }

    pub fn reset_current_session(&mut self) {
        self.current = None;
    }

    async fn finalize(&mut self, pause_duration: u64, abort_reason: Option<String>) -> Option<Session> {
        let mut session = self.current.take()?;
        let end_time = self.clock.now();

        session.end_time = Some(end_time);
        session.completed = abort_reason.is_none();
        session.aborted = abort_reason.is_some();
        session.abort_reason = abort_reason;
        session.pause_duration = pause_duration.min(self.clock.secs_since(session.start_time));

        self.sessions.push(session.clone());
        self.flush().await;
        Some(session)
    }

    async fn flush(&mut self) {
        let Some(user) = self.user_id.clone() else {
            return;
        };

        if !self.log_loaded {
            match self.repository.load(&user).await {
                Ok(stored) => {
                    let mut restored = self.restore(stored);
                    log_info!(
                        "loaded {} earlier sessions for {user}; appending {} new ones",
                        restored.len(),
                        self.sessions.len()
                    );
                    restored.append(&mut self.sessions);
                    self.sessions = restored;
                    self.log_loaded = true;
                }
                Err(err) => {
                    log_error!(
                        "sessions for {user} are still unreadable; keeping {} new sessions in memory only: {err:#}",
                        self.sessions.len()
                    );
                    return;
                }
            }
        }

        if let Err(err) = self.repository.save(&user, &self.sessions).await {
            log_error!("failed to persist sessions for {user}: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRepository;
    use std::time::Duration;

    fn alice() -> UserId {
        UserId::new("alice")
    }

    async fn store_for(repo: Arc<MemoryRepository>, user: Option<UserId>) -> SessionStore {
        let mut store = SessionStore::new(repo, SessionClock::anchored());
        store.switch_user(user).await;
        store
    }

    #[tokio::test(start_paused = true)]
    async fn completes_and_persists_the_current_session() {
        let repo = Arc::new(MemoryRepository::default());
        let mut store = store_for(repo.clone(), Some(alice())).await;

        let created = store.create_session(SessionType::Work, 1500).unwrap();
        assert_eq!(store.current_session(), Some(&created));
        assert_eq!(store.work_session_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let done = store.complete_session(4).await.unwrap();

        assert!(done.completed && !done.aborted);
        assert_eq!(done.pause_duration, 4);
        assert_eq!(done.abort_reason, None);
        assert_eq!((done.end_time.unwrap() - done.start_time).num_seconds(), 30);
        assert!(store.current_session().is_none());
        assert_eq!(store.sessions(), &[done.clone()]);
        assert_eq!(repo.saved(&alice()), vec![done]);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_uses_default_reason() {
        let repo = Arc::new(MemoryRepository::default());
        let mut store = store_for(repo, Some(alice())).await;

        store.create_session(SessionType::Break, 300);
        let stopped = store.abort_session(0, None).await.unwrap();
        assert!(stopped.aborted && !stopped.completed);
        assert_eq!(stopped.abort_reason.as_deref(), Some(DEFAULT_ABORT_REASON));

        store.create_session(SessionType::Work, 1500);
        let stopped = store.abort_session(0, Some("distracted".into())).await.unwrap();
        assert_eq!(stopped.abort_reason.as_deref(), Some("distracted"));
        assert_eq!(store.sessions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finalizing_without_current_session_is_a_no_op() {
        let repo = Arc::new(MemoryRepository::default());
        let mut store = store_for(repo.clone(), Some(alice())).await;

        assert!(store.complete_session(0).await.is_none());
        assert!(store.abort_session(0, None).await.is_none());
        assert_eq!(repo.save_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_duration_never_exceeds_elapsed_time() {
        let repo = Arc::new(MemoryRepository::default());
        let mut store = store_for(repo, Some(alice())).await;

        store.create_session(SessionType::Work, 1500);
        tokio::time::sleep(Duration::from_secs(10)).await;
        let done = store.complete_session(600).await.unwrap();

        assert_eq!(done.pause_duration, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn without_user_nothing_is_recorded_but_work_is_counted() {
        let repo = Arc::new(MemoryRepository::default());
        let mut store = store_for(repo.clone(), None).await;

        assert!(store.create_session(SessionType::Work, 1500).is_none());
        assert!(store.create_session(SessionType::Break, 300).is_none());
        assert_eq!(store.work_session_count(), 1);
        assert!(store.complete_session(0).await.is_none());
        assert_eq!(repo.save_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_user_loads_and_revalidates_their_log() {
        let repo = Arc::new(MemoryRepository::default());
        repo.seed(
            &alice(),
            vec![StoredSession {
                id: "old".into(),
                user_id: "alice".into(),
                start_time: "garbage".into(),
                end_time: Some("2024-02-02T10:00:00Z".into()),
                duration: 1500,
                session_type: SessionType::Work,
                completed: true,
                aborted: false,
                abort_reason: None,
                pause_duration: 0,
            }],
        );

        let mut store = store_for(repo.clone(), Some(alice())).await;
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.sessions()[0].id, "old");

        store.create_session(SessionType::Work, 60);
        store.switch_user(None).await;
        assert!(store.sessions().is_empty());
        assert!(store.current_session().is_none());
        assert_eq!(store.work_session_count(), 0);
        assert_eq!(repo.stored(&alice()).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_log_starts_empty_and_save_failures_keep_memory() {
        let repo = Arc::new(MemoryRepository::failing());
        let mut store = store_for(repo, Some(alice())).await;
        assert!(store.sessions().is_empty());

        store.create_session(SessionType::Work, 60);
        let done = store.complete_session(0).await;
        assert!(done.is_some());
        assert_eq!(store.sessions().len(), 1);
    }

    fn stored(id: &str) -> StoredSession {
        StoredSession {
            id: id.into(),
            user_id: "alice".into(),
            start_time: "2024-02-02T09:00:00Z".into(),
            end_time: Some("2024-02-02T09:25:00Z".into()),
            duration: 1500,
            session_type: SessionType::Work,
            completed: true,
            aborted: false,
            abort_reason: None,
            pause_duration: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_log_is_never_overwritten() {
        let repo = Arc::new(MemoryRepository::failing_loads(usize::MAX));
        repo.seed(&alice(), (1..=5).map(|n| stored(&format!("old-{n}"))).collect());
        let mut store = store_for(repo.clone(), Some(alice())).await;
        assert!(store.sessions().is_empty());

        store.create_session(SessionType::Work, 60);
        assert!(store.complete_session(0).await.is_some());

        assert_eq!(store.sessions().len(), 1);
        assert_eq!(repo.save_calls(), 0);
        assert_eq!(repo.stored(&alice()).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn append_after_transient_load_failure_keeps_history() {
        let repo = Arc::new(MemoryRepository::failing_loads(1));
        repo.seed(&alice(), (1..=5).map(|n| stored(&format!("old-{n}"))).collect());
        let mut store = store_for(repo.clone(), Some(alice())).await;
        assert!(store.sessions().is_empty());

        store.create_session(SessionType::Work, 60);
        let done = store.complete_session(0).await.unwrap();

        let saved = repo.stored(&alice());
        assert_eq!(saved.len(), 6);
        assert_eq!(saved[0].id, "old-1");
        assert_eq!(saved[5].id, done.id);
        assert_eq!(store.sessions().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_current_session_appends_nothing() {
        let repo = Arc::new(MemoryRepository::default());
        let mut store = store_for(repo.clone(), Some(alice())).await;

        store.create_session(SessionType::Work, 60);
        store.reset_current_session();

        assert!(store.current_session().is_none());
        assert!(store.sessions().is_empty());
        assert_eq!(repo.save_calls(), 0);
    }
}
