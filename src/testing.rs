//! In-memory collaborators for unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::{
    identity::UserId,
    models::Session,
    notifications::{Notification, NotificationSink},
    store::{revalidate_session, SessionRepository, StoredSession},
};

#[derive(Default)]
pub struct MemoryRepository {
    logs: Mutex<HashMap<UserId, Vec<StoredSession>>>,
    saves: AtomicUsize,
    load_failures: AtomicUsize,
    should_fail: bool,
}

impl MemoryRepository {
    /// Every load and save fails.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            load_failures: AtomicUsize::new(usize::MAX),
            ..Self::default()
        }
    }

    /// The next `count` loads fail; saves succeed.
    pub fn failing_loads(count: usize) -> Self {
        Self {
            load_failures: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn seed(&self, user_id: &UserId, sessions: Vec<StoredSession>) {
        self.logs.lock().unwrap().insert(user_id.clone(), sessions);
    }

    pub fn stored(&self, user_id: &UserId) -> Vec<StoredSession> {
        self.logs
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn saved(&self, user_id: &UserId) -> Vec<Session> {
        self.stored(user_id)
            .into_iter()
            .map(|stored| revalidate_session(stored, Utc::now()))
            .collect()
    }

    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn load(&self, user_id: &UserId) -> Result<Vec<StoredSession>> {
        let failing = self
            .load_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 0).then(|| if left == usize::MAX { left } else { left - 1 })
            })
            .is_ok();
        if failing {
            return Err(anyhow!("repository unavailable"));
        }
        Ok(self.stored(user_id))
    }

    async fn save(&self, user_id: &UserId, sessions: &[Session]) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(anyhow!("repository unavailable"));
        }
        self.logs.lock().unwrap().insert(
            user_id.clone(),
            sessions.iter().map(StoredSession::from).collect(),
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
    should_fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.message.clone())
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.messages().iter().filter(|m| m.as_str() == message).count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        self.received.lock().unwrap().push(notification.clone());
        if self.should_fail {
            return Err(anyhow!("notification backend rejected the message"));
        }
        Ok(())
    }
}
