use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity provider: holds the signed-in user, if any, and lets the focus
/// loop observe changes through a `watch` channel.
pub struct Identity {
    tx: watch::Sender<Option<UserId>>,
}

impl Identity {
    pub fn new(initial: Option<UserId>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }

    pub fn sign_in(&self, user_id: UserId) {
        self.set(Some(user_id));
    }

    pub fn sign_out(&self) {
        self.set(None);
    }

    fn set(&self, user_id: Option<UserId>) {
        self.tx.send_if_modified(|current| {
            if *current == user_id {
                false
            } else {
                *current = user_id;
                true
            }
        });
    }
}
