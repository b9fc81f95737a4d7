//! Runtime configuration for the `focusflow` binary, read from the environment.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::identity::UserId;

pub const DATA_DIR_VAR: &str = "FOCUSFLOW_DATA_DIR";
pub const STORAGE_VAR: &str = "FOCUSFLOW_STORAGE";
pub const USER_VAR: &str = "FOCUSFLOW_USER";
pub const DEBUG_VAR: &str = "FOCUSFLOW_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Sqlite,
    Json,
}

impl StorageKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "sqlite" => Ok(StorageKind::Sqlite),
            "json" => Ok(StorageKind::Json),
            other => bail!("unknown storage backend '{other}' (expected sqlite or json)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub data_dir: PathBuf,
    pub storage: StorageKind,
    pub user: Option<UserId>,
    pub debug: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = lookup(DATA_DIR_VAR)
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let storage = match lookup(STORAGE_VAR) {
            Some(value) => StorageKind::parse(&value)?,
            None => StorageKind::default(),
        };
        let user = lookup(USER_VAR)
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .map(UserId::new);
        let debug = lookup(DEBUG_VAR)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            data_dir,
            storage,
            user,
            debug,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("focusflow.sqlite3")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("focusflow"))
        .unwrap_or_else(|| PathBuf::from(".focusflow"))
}
