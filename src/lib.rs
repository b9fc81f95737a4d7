pub mod clock;
pub mod config;
mod db;
pub mod format;
pub mod identity;
pub mod models;
pub mod notifications;
pub mod settings;
mod shell;
pub mod store;
pub mod timer;
mod utils;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};

use config::{RuntimeConfig, StorageKind};
use identity::Identity;
use notifications::ConsoleNotifier;
use settings::SettingsStore;
use store::{JsonFileRepository, SessionRepository};
use timer::{Collaborators, FocusOrchestrator, OrchestratorOptions};

pub use db::SqliteSessionRepository;

pub fn run() -> Result<()> {
    let config = RuntimeConfig::from_env()?;

    // RUST_LOG, when set, overrides the default level.
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();

    log::info!("FocusFlow starting up...");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory {}", config.data_dir.display())
    })?;

    let settings = Arc::new(SettingsStore::new(config.settings_path())?);
    let repository: Arc<dyn SessionRepository> = match config.storage {
        StorageKind::Sqlite => {
            let repository = SqliteSessionRepository::open(config.database_path())?;
            log::info!(
                "Sessions stored in {}",
                repository.database().path().display()
            );
            Arc::new(repository)
        }
        StorageKind::Json => {
            let repository = JsonFileRepository::new(config.sessions_dir())?;
            log::info!("Sessions stored in {}", repository.dir().display());
            Arc::new(repository)
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let identity = Identity::new(config.user.clone());
        let focus = FocusOrchestrator::spawn(
            Collaborators {
                identity: identity.subscribe(),
                settings: settings.clone(),
                repository,
                notifier: Arc::new(ConsoleNotifier),
            },
            OrchestratorOptions::default(),
        );

        shell::run_shell(focus, identity, settings).await
    })
}
