use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;
use writers_backup_core::BackupKind;

use crate::atomic::write_atomic;

/// Metadata that can not be recovered from an artifact name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: String,
    pub kind: BackupKind,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Per-source sidecar keyed by artifact file name. Artifact names stay the
/// source of truth; a missing or unreadable index only loses ids, kinds and
/// hashes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
}

impl RecordIndex {
    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        match serde_json::from_str(&raw) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparseable backup index");
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        write_atomic(path, raw.as_bytes())
    }

    pub fn get(&self, artifact_name: &str) -> Option<&IndexEntry> {
        self.entries.get(artifact_name)
    }

    pub fn insert(&mut self, artifact_name: impl Into<String>, entry: IndexEntry) {
        self.entries.insert(artifact_name.into(), entry);
    }

    pub fn remove(&mut self, artifact_name: &str) -> Option<IndexEntry> {
        self.entries.remove(artifact_name)
    }

    /// Drops entries whose artifact no longer exists. Returns how many went.
    pub fn retain_artifacts<F>(&mut self, mut exists: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|name, _| exists(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_owned(),
            kind: BackupKind::Manual,
            size_bytes: 5,
            content_hash: None,
        }
    }

    #[test]
    fn missing_index_loads_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let index = RecordIndex::load(&tmp.path().join("absent.index.json")).expect("load");
        assert!(index.is_empty());
    }

    #[test]
    fn corrupt_index_loads_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("notes.md.index.json");
        fs::write(&path, b"{not json").expect("write");
        assert!(RecordIndex::load(&path).expect("load").is_empty());
    }

    #[test]
    fn save_then_load_preserves_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("notes.md.index.json");

        let mut index = RecordIndex {
            source_path: Some(PathBuf::from("/novel/notes.md")),
            ..Default::default()
        };
        index.insert("a.backup", entry("one"));
        index.insert("b.backup", entry("two"));
        index.save(&path).expect("save");

        let loaded = RecordIndex::load(&path).expect("load");
        assert_eq!(loaded, index);
    }

    #[test]
    fn retain_artifacts_prunes_orphans() {
        let mut index = RecordIndex::default();
        index.insert("kept", entry("1"));
        index.insert("orphan", entry("2"));
        let removed = index.retain_artifacts(|name| name == "kept");
        assert_eq!(removed, 1);
        assert!(index.get("kept").is_some());
        assert!(index.get("orphan").is_none());
    }
}
