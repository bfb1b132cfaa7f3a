use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a backup artifact was captured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Manual,
    Automatic,
    PreRestore,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Automatic => "automatic",
            BackupKind::PreRestore => "pre-restore",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Whether a store holds copies of a single manuscript file or archives of a
/// whole project directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BackupScope {
    File,
    Project,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: String,
    pub source_path: PathBuf,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub kind: BackupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl BackupRecord {
    /// File name of the artifact, or an empty string for a degenerate path.
    pub fn artifact_name(&self) -> &str {
        artifact_file_name(&self.artifact_path)
    }

    /// Ordering used everywhere records are listed: newest capture first.
    /// Equal instants fall back to the artifact name, descending, which puts
    /// the highest collision suffix first.
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.artifact_name().cmp(self.artifact_name()))
    }
}

pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(BackupRecord::cmp_newest_first);
}

/// Fresh random record id.
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn artifact_file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}
