use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::backup::{ArchiveFormat, BackupManager};
use crate::bookmarks::{BookmarkMergeOptions, DedupOptions};
use crate::error::{Error, Result};
use crate::history::HistoryMergeOptions;
use crate::profile::MergeStrategy;
use crate::session::SessionMergeOptions;

const APP_DIR: &str = "floorp-merge";
const SETTINGS_FILE: &str = "settings.json";

/// Persisted defaults for every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where backups are written and listed.
    pub backup_dir: PathBuf,

    pub archive_format: ArchiveFormat,

    /// Snapshot the target profile before a migration.
    pub backup_before_migrate: bool,

    /// Strategy for files without a dedicated merge engine.
    pub merge_strategy: MergeStrategy,

    pub bookmarks: BookmarkMergeOptions,
    pub history: HistoryMergeOptions,
    pub sessions: SessionMergeOptions,
    pub dedup: DedupOptions,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            archive_format: ArchiveFormat::Zip,
            backup_before_migrate: true,
            merge_strategy: MergeStrategy::Smart,
            bookmarks: BookmarkMergeOptions::default(),
            history: HistoryMergeOptions::default(),
            sessions: SessionMergeOptions::default(),
            dedup: DedupOptions::default(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("backups")
}

/// `<config_dir>/floorp-merge/settings.json`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(SETTINGS_FILE)
}

impl Settings {
    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings =
            serde_json::from_str(&content).map_err(|e| Error::format_invalid(path, e.to_string()))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        // Create parent directory if not exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup_dir.as_os_str().is_empty() {
            return Err(Error::format_invalid(
                SETTINGS_FILE,
                "backup_dir must not be empty",
            ));
        }

        if !self.backup_before_migrate {
            warn!("⚠️  Backups before migration are disabled. A failed merge cannot be rolled back from a snapshot.");
        }
        if self.merge_strategy == MergeStrategy::Overwrite {
            warn!("⚠️  Merge strategy is overwrite: target preference and extension files will be replaced.");
        }

        Ok(())
    }

    pub fn backup_manager(&self) -> BackupManager {
        BackupManager::new(&self.backup_dir, self.archive_format)
    }
}
