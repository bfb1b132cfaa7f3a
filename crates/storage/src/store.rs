use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use writers_backup_core::naming::{source_basename, truncate_to_millis};
use writers_backup_core::{
    content_hash, new_record_id, sort_newest_first, ArtifactName, BackupError, BackupKind,
    BackupRecord, BackupResult, BackupScope, BackupSettings, IoContext,
};

use crate::atomic::{parent_dir, StagedFile};
use crate::index::{IndexEntry, RecordIndex};

/// Hidden directory, next to each source file, holding its backups.
pub const BACKUP_DIR_NAME: &str = ".backups";

/// Extension of whole-project archives.
pub const PROJECT_ARCHIVE_EXTENSION: &str = "tar.zst";

const INDEX_SUFFIX: &str = "index.json";

/// The artifacts of one source, in one directory.
///
/// Single files keep their history in `<source-dir>/.backups/`; projects in
/// `<data-root>/backups/<project-name>/`. Several sources can share a
/// directory, each store only sees artifacts carrying its own basename.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
    source_path: PathBuf,
    basename: String,
    extension: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub count: usize,
    pub total_bytes: u64,
}

impl StoreStats {
    pub fn of(records: &[BackupRecord]) -> Self {
        Self {
            count: records.len(),
            total_bytes: records.iter().map(|r| r.size_bytes).sum(),
        }
    }
}

impl BackupStore {
    pub fn for_file(source: &Path, extension: &str) -> BackupResult<Self> {
        let source_path = absolute_path(source)
            .io_context(|| format!("resolve source path {}", source.display()))?;
        let basename = named(&source_path, "file")?;
        let dir = parent_dir(&source_path).join(BACKUP_DIR_NAME);
        Ok(Self {
            dir,
            source_path,
            basename,
            extension: normalize(extension),
        })
    }

    pub fn for_project(project_dir: &Path, data_root: &Path) -> BackupResult<Self> {
        let source_path = absolute_path(project_dir)
            .io_context(|| format!("resolve project path {}", project_dir.display()))?;
        let basename = named(&source_path, "directory")?;
        let data_root = absolute_path(data_root)
            .io_context(|| format!("resolve data root {}", data_root.display()))?;
        let dir = data_root.join("backups").join(&basename);
        Ok(Self {
            dir,
            source_path,
            basename,
            extension: PROJECT_ARCHIVE_EXTENSION.to_owned(),
        })
    }

    pub fn for_scope(scope: BackupScope, source: &Path, settings: &BackupSettings) -> BackupResult<Self> {
        match scope {
            BackupScope::File => Self::for_file(source, settings.extension()),
            BackupScope::Project => Self::for_project(source, &settings.data_root),
        }
    }

    /// Opens the store an existing artifact path belongs to.
    pub fn for_artifact(artifact: &Path, settings: &BackupSettings) -> BackupResult<Self> {
        let artifact = absolute_path(artifact)
            .io_context(|| format!("resolve artifact path {}", artifact.display()))?;
        let scope = scope_of_artifact(&artifact);
        let extension = match scope {
            BackupScope::File => settings.extension(),
            BackupScope::Project => PROJECT_ARCHIVE_EXTENSION,
        };
        let parsed = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|name| ArtifactName::parse(name, extension))
            .ok_or_else(|| BackupError::NotAFile {
                path: artifact.clone(),
                expected: "backup artifact",
            })?;

        let dir = parent_dir(&artifact);
        let index_path = index_path(&dir, &parsed.basename);
        let index = RecordIndex::load(&index_path)
            .io_context(|| format!("read backup index {}", index_path.display()))?;
        let source_path = index.source_path.unwrap_or_else(|| match scope {
            BackupScope::File => parent_dir(&dir).join(&parsed.basename),
            BackupScope::Project => PathBuf::from(&parsed.basename),
        });

        Ok(Self {
            dir,
            source_path,
            basename: parsed.basename,
            extension: extension.to_owned(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn scope(&self) -> BackupScope {
        if self.extension == PROJECT_ARCHIVE_EXTENSION {
            BackupScope::Project
        } else {
            BackupScope::File
        }
    }

    pub fn index_path(&self) -> PathBuf {
        index_path(&self.dir, &self.basename)
    }

    /// All artifacts of this source, newest first.
    pub fn list(&self) -> BackupResult<Vec<BackupRecord>> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(records),
            Err(e) => {
                return Err(BackupError::io(
                    format!("list backup directory {}", self.dir.display()),
                    e,
                ))
            }
        };
        let index = self.load_index()?;

        for entry in entries {
            let entry = entry.io_context(|| format!("list backup directory {}", self.dir.display()))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(parsed) = ArtifactName::parse(name, &self.extension) else {
                continue;
            };
            if parsed.basename != self.basename {
                continue;
            }
            let size = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta.len(),
                Ok(_) => continue,
                // removed by a concurrent cleanup between readdir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(BackupError::io(format!("stat backup artifact {name}"), e)),
            };
            records.push(self.record_from(name, parsed.created_at, size, index.get(name)));
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    /// Looks up the record for an artifact path inside this store.
    pub fn find(&self, artifact_path: &Path) -> BackupResult<Option<BackupRecord>> {
        let Some(name) = artifact_path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Some(parsed) = ArtifactName::parse(name, &self.extension) else {
            return Ok(None);
        };
        if parsed.basename != self.basename {
            return Ok(None);
        }
        let path = self.dir.join(name);
        let size = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BackupError::io(format!("stat backup artifact {}", path.display()), e)),
        };
        let index = self.load_index()?;
        Ok(Some(self.record_from(name, parsed.created_at, size, index.get(name))))
    }

    /// Writes `content` as a new artifact captured at `instant`.
    pub fn add(&self, content: &[u8], kind: BackupKind, instant: DateTime<Utc>) -> BackupResult<BackupRecord> {
        self.add_with(content, kind, instant, |_| Ok(()))
    }

    /// Like [`BackupStore::add`], running `before_commit` on the staged
    /// temporary file right before it is renamed into place.
    pub(crate) fn add_with<F>(
        &self,
        content: &[u8],
        kind: BackupKind,
        instant: DateTime<Utc>,
        before_commit: F,
    ) -> BackupResult<BackupRecord>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        fs::create_dir_all(&self.dir)
            .io_context(|| format!("create backup directory {}", self.dir.display()))?;

        let existing = self.list()?;
        let instant = truncate_to_millis(instant);
        let created_at = existing
            .first()
            .map_or(instant, |newest| newest.created_at.max(instant));
        let mut seq = existing
            .iter()
            .filter(|r| r.created_at == created_at)
            .filter_map(|r| ArtifactName::parse(r.artifact_name(), &self.extension))
            .map(|n| n.seq + 1)
            .max()
            .unwrap_or(0);

        let mut staged = StagedFile::stage(&self.dir, content)
            .io_context(|| format!("stage backup artifact in {}", self.dir.display()))?;
        before_commit(staged.path()).io_context(|| "stage backup artifact")?;

        let (name, artifact_path) = loop {
            let name = ArtifactName::new(self.basename.as_str(), created_at)
                .with_seq(seq)
                .render(&self.extension);
            let target = self.dir.join(&name);
            match staged.commit_new(&target) {
                Ok(()) => break (name, target),
                Err((back, e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(artifact = %target.display(), "artifact name taken, bumping sequence");
                    staged = back;
                    seq += 1;
                }
                Err((_, e)) => {
                    return Err(BackupError::io(
                        format!("write backup artifact {}", target.display()),
                        e,
                    ))
                }
            }
        };

        let record = BackupRecord {
            id: new_record_id(),
            source_path: self.source_path.clone(),
            artifact_path,
            created_at,
            size_bytes: content.len() as u64,
            kind,
            content_hash: Some(content_hash(content)),
        };

        let entry = IndexEntry {
            id: record.id.clone(),
            kind,
            size_bytes: record.size_bytes,
            content_hash: record.content_hash.clone(),
        };
        if let Err(e) = self.update_index(|index| index.insert(name, entry)) {
            warn!(index = %self.index_path().display(), error = %e, "failed to update backup index");
        }
        Ok(record)
    }

    /// Deletes an artifact. Returns `false` when it was already gone.
    pub fn remove(&self, record: &BackupRecord) -> BackupResult<bool> {
        let removed = match fs::remove_file(&record.artifact_path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(BackupError::io(
                    format!("delete backup artifact {}", record.artifact_path.display()),
                    e,
                ))
            }
        };
        let name = record.artifact_name().to_owned();
        if let Err(e) = self.update_index(|index| {
            index.remove(&name);
        }) {
            warn!(index = %self.index_path().display(), error = %e, "failed to update backup index");
        }
        Ok(removed)
    }

    fn record_from(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
        size_on_disk: u64,
        entry: Option<&IndexEntry>,
    ) -> BackupRecord {
        let artifact_path = self.dir.join(name);
        match entry {
            Some(entry) => BackupRecord {
                id: entry.id.clone(),
                source_path: self.source_path.clone(),
                artifact_path,
                created_at,
                size_bytes: entry.size_bytes,
                kind: entry.kind,
                content_hash: entry.content_hash.clone(),
            },
            None => BackupRecord {
                id: name.to_owned(),
                source_path: self.source_path.clone(),
                artifact_path,
                created_at,
                size_bytes: size_on_disk,
                kind: BackupKind::Manual,
                content_hash: None,
            },
        }
    }

    fn load_index(&self) -> BackupResult<RecordIndex> {
        let path = self.index_path();
        RecordIndex::load(&path).io_context(|| format!("read backup index {}", path.display()))
    }

    fn update_index<F>(&self, change: F) -> io::Result<()>
    where
        F: FnOnce(&mut RecordIndex),
    {
        let path = self.index_path();
        let mut index = RecordIndex::load(&path)?;
        if index.source_path.is_none() {
            index.source_path = Some(self.source_path.clone());
        }
        change(&mut index);
        let pruned = index.retain_artifacts(|name| self.dir.join(name).is_file());
        if pruned > 0 {
            debug!(pruned, index = %path.display(), "dropped orphaned index entries");
        }
        index.save(&path)
    }
}

/// Project archives are recognised by their extension; everything else is a
/// single-file artifact.
pub fn scope_of_artifact(artifact: &Path) -> BackupScope {
    let is_archive = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(&format!(".{PROJECT_ARCHIVE_EXTENSION}")));
    if is_archive {
        BackupScope::Project
    } else {
        BackupScope::File
    }
}

/// Makes `path` absolute against the working directory and resolves `.` and
/// `..` lexically, so the same source always maps to the same key. Symlinks
/// are not followed.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

fn index_path(dir: &Path, basename: &str) -> PathBuf {
    dir.join(format!("{basename}.{INDEX_SUFFIX}"))
}

fn named(path: &Path, expected: &'static str) -> BackupResult<String> {
    source_basename(path)
        .map(str::to_owned)
        .ok_or_else(|| BackupError::NotAFile {
            path: path.to_path_buf(),
            expected,
        })
}

fn normalize(extension: &str) -> String {
    writers_backup_core::naming::normalize_extension(extension).to_owned()
}
