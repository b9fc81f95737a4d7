use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::models::SessionType;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PomodoroSettings {
    /// Minutes.
    pub work_duration: u32,
    /// Minutes.
    pub break_duration: u32,
    /// Minutes.
    pub long_break_duration: u32,
    pub sessions_until_long_break: u32,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            work_duration: 25,
            break_duration: 5,
            long_break_duration: 15,
            sessions_until_long_break: 4,
            auto_start_breaks: true,
            auto_start_work: true,
        }
    }
}

impl PomodoroSettings {
    pub fn duration_secs(&self, session_type: SessionType) -> u64 {
        let minutes = match session_type {
            SessionType::Work => self.work_duration,
            SessionType::Break => self.break_duration,
            SessionType::LongBreak => self.long_break_duration,
        };
        u64::from(minutes) * 60
    }

    fn normalized(mut self) -> Self {
        self.work_duration = self.work_duration.max(1);
        self.break_duration = self.break_duration.max(1);
        self.long_break_duration = self.long_break_duration.max(1);
        self.sessions_until_long_break = self.sessions_until_long_break.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub sound_enabled: bool,
    /// 0-100.
    pub volume: u8,
    pub notify_before_end: bool,
    /// Seconds before the end of a session.
    pub notify_before_end_time: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            volume: 80,
            notify_before_end: true,
            notify_before_end_time: 10,
        }
    }
}

impl NotificationSettings {
    fn normalized(mut self) -> Self {
        self.volume = self.volume.min(100);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FocusSettings {
    pub pomodoro: PomodoroSettings,
    pub notifications: NotificationSettings,
}

impl FocusSettings {
    pub fn normalized(self) -> Self {
        Self {
            pomodoro: self.pomodoro.normalized(),
            notifications: self.notifications.normalized(),
        }
    }
}

/// Configuration provider consulted by the focus loop. Every call returns a
/// fresh snapshot; callers must not hold on to it across operations.
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> FocusSettings;
}

impl SettingsProvider for FocusSettings {
    fn snapshot(&self) -> FocusSettings {
        self.clone()
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<FocusSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<FocusSettings>(&contents) {
                Ok(settings) => settings.normalized(),
                Err(err) => {
                    log_warn!(
                        "Ignoring unreadable settings at {}: {err}; using defaults",
                        path.display()
                    );
                    FocusSettings::default()
                }
            }
        } else {
            FocusSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn pomodoro(&self) -> PomodoroSettings {
        self.read().pomodoro
    }

    pub fn notifications(&self) -> NotificationSettings {
        self.read().notifications
    }

    pub fn update_pomodoro(&self, settings: PomodoroSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.pomodoro = settings.normalized();
        self.persist(&guard)
    }

    pub fn update_notifications(&self, settings: NotificationSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.notifications = settings.normalized();
        self.persist(&guard)
    }

    fn read(&self) -> FocusSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn persist(&self, data: &FocusSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl SettingsProvider for SettingsStore {
    fn snapshot(&self) -> FocusSettings {
        self.read()
    }
}
