use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::naming::{normalize_extension, DEFAULT_EXTENSION};
use crate::retention::RetentionPolicy;

/// Auto-backup timers may not fire more often than once a minute.
pub const MIN_BACKUP_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_MAX_BACKUPS_PER_FILE: usize = 10;
pub const DEFAULT_BACKUP_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Fully resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSettings {
    pub max_backups_per_file: usize,
    pub backup_interval_ms: u64,
    /// `None` disables age-based cleanup.
    pub retention_days: Option<u32>,
    pub backup_extension: String,
    /// Root for project archives: `<data_root>/backups/<project>/`.
    pub data_root: PathBuf,
    /// Patterns skipped when archiving a project directory.
    pub exclude_patterns: Vec<String>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            max_backups_per_file: DEFAULT_MAX_BACKUPS_PER_FILE,
            backup_interval_ms: DEFAULT_BACKUP_INTERVAL_MS,
            retention_days: Some(DEFAULT_RETENTION_DAYS),
            backup_extension: format!(".{DEFAULT_EXTENSION}"),
            data_root: PathBuf::from("./.writers-backup"),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl BackupSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_backups_per_file < 1 {
            return Err(ConfigError(format!(
                "max_backups_per_file must be at least 1 (got {})",
                self.max_backups_per_file
            )));
        }
        validate_interval_ms(self.backup_interval_ms)?;

        let ext = self.extension();
        if ext.is_empty() {
            return Err(ConfigError("backup_extension must not be empty".to_owned()));
        }
        if ext.contains(['/', '\\']) || ext.ends_with('.') {
            return Err(ConfigError(format!(
                "backup_extension {:?} is not a valid file extension",
                self.backup_extension
            )));
        }
        Ok(())
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_count: self.max_backups_per_file.max(1),
            max_age_days: self.retention_days,
        }
    }

    pub fn backup_interval(&self) -> Duration {
        Duration::from_millis(self.backup_interval_ms)
    }

    /// Artifact extension without the leading dot.
    pub fn extension(&self) -> &str {
        normalize_extension(&self.backup_extension)
    }
}

pub fn validate_interval_ms(interval_ms: u64) -> Result<(), ConfigError> {
    if interval_ms < MIN_BACKUP_INTERVAL_MS {
        return Err(ConfigError(format!(
            "backup interval must be at least {MIN_BACKUP_INTERVAL_MS} ms (got {interval_ms})"
        )));
    }
    Ok(())
}

pub fn default_exclude_patterns() -> Vec<String> {
    ["*.tmp", ".DS_Store", "Thumbs.db", "*.log", "node_modules/", ".git/"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}
