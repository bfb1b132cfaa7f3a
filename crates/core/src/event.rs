use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::{BackupKind, BackupRecord};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    Requested,
    SourceMissing,
    Shutdown,
}

/// Lifecycle notifications. Serialized as `{"event": "backupCreated", ...}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BackupEvent {
    BackupCreated {
        record: BackupRecord,
        kind: BackupKind,
        timestamp: DateTime<Utc>,
    },
    BackupRestored {
        backup_path: PathBuf,
        destination: PathBuf,
        timestamp: DateTime<Utc>,
    },
    BackupDeleted {
        backup_path: PathBuf,
        timestamp: DateTime<Utc>,
    },
    BackupsCleanedUp {
        source_path: PathBuf,
        removed: usize,
        timestamp: DateTime<Utc>,
    },
    AutoBackupStarted {
        source_path: PathBuf,
        interval_ms: u64,
        timestamp: DateTime<Utc>,
    },
    AutoBackupStopped {
        source_path: PathBuf,
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
    BackupError {
        source_path: PathBuf,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl BackupEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackupEvent::BackupCreated { .. } => "backupCreated",
            BackupEvent::BackupRestored { .. } => "backupRestored",
            BackupEvent::BackupDeleted { .. } => "backupDeleted",
            BackupEvent::BackupsCleanedUp { .. } => "backupsCleanedUp",
            BackupEvent::AutoBackupStarted { .. } => "autoBackupStarted",
            BackupEvent::AutoBackupStopped { .. } => "autoBackupStopped",
            BackupEvent::BackupError { .. } => "backupError",
        }
    }

    /// The source or artifact path the event is about.
    pub fn path(&self) -> &Path {
        match self {
            BackupEvent::BackupCreated { record, .. } => &record.source_path,
            BackupEvent::BackupRestored { backup_path, .. }
            | BackupEvent::BackupDeleted { backup_path, .. } => backup_path,
            BackupEvent::BackupsCleanedUp { source_path, .. }
            | BackupEvent::AutoBackupStarted { source_path, .. }
            | BackupEvent::AutoBackupStopped { source_path, .. }
            | BackupEvent::BackupError { source_path, .. } => source_path,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BackupEvent::BackupCreated { timestamp, .. }
            | BackupEvent::BackupRestored { timestamp, .. }
            | BackupEvent::BackupDeleted { timestamp, .. }
            | BackupEvent::BackupsCleanedUp { timestamp, .. }
            | BackupEvent::AutoBackupStarted { timestamp, .. }
            | BackupEvent::AutoBackupStopped { timestamp, .. }
            | BackupEvent::BackupError { timestamp, .. } => *timestamp,
        }
    }
}
