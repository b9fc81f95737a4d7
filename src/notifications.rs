use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::settings::NotificationSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub message: String,
    pub sound_enabled: bool,
    /// 0-100.
    pub volume: u8,
}

impl Notification {
    pub fn new(message: impl Into<String>, preferences: &NotificationSettings) -> Self {
        Self {
            message: message.into(),
            sound_enabled: preferences.sound_enabled,
            volume: preferences.volume.min(100),
        }
    }
}

/// Fire-and-forget notification sink. An `Err` is logged by the caller and
/// otherwise ignored.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Prints notifications to stdout, ringing the terminal bell when sound is on.
pub struct ConsoleNotifier;

impl NotificationSink for ConsoleNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        let bell = if notification.sound_enabled && notification.volume > 0 {
            "\x07"
        } else {
            ""
        };
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{bell}>> {}", notification.message)
            .and_then(|_| stdout.flush())
            .context("failed to write notification to stdout")
    }
}
