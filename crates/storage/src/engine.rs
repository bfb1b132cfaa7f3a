use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use writers_backup_core::retention::{self, RetentionPolicy};
use writers_backup_core::{
    file_hash, BackupError, BackupEvent, BackupKind, BackupRecord, BackupResult, BackupScope,
    BackupSettings, ConfigError, IoContext, RestoreError,
};

use crate::archive::{self, ExcludeSet};
use crate::atomic::{parent_dir, StagedFile};
use crate::events::EventSink;
use crate::store::{absolute_path, scope_of_artifact, BackupStore, BACKUP_DIR_NAME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Capture the destination's current content before overwriting it.
    pub backup_current_first: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            backup_current_first: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub artifact_path: PathBuf,
    pub exists: bool,
    pub size_matches: bool,
    /// `None` when no hash was recorded for the artifact.
    pub hash_matches: Option<bool>,
    /// Only checked for project archives.
    pub archive_readable: Option<bool>,
}

impl VerifyReport {
    fn missing(artifact_path: PathBuf) -> Self {
        Self {
            artifact_path,
            exists: false,
            size_matches: false,
            hash_matches: None,
            archive_readable: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.exists
            && self.size_matches
            && self.hash_matches != Some(false)
            && self.archive_readable != Some(false)
    }
}

/// Capture, restore, delete and verify, serialized per source path.
///
/// Cheap to clone; clones share settings, the event sink and the lock table.
#[derive(Clone)]
pub struct BackupEngine {
    inner: Arc<Inner>,
}

struct Inner {
    settings: BackupSettings,
    excludes: ExcludeSet,
    events: EventSink,
    locks: PathLocks,
}

impl BackupEngine {
    pub fn new(settings: BackupSettings, events: EventSink) -> Result<Self, ConfigError> {
        settings.validate()?;
        let excludes = ExcludeSet::new(&settings.exclude_patterns)
            .map_err(|e| ConfigError(format!("invalid exclude pattern: {e}")))?;
        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                excludes,
                events,
                locks: PathLocks::default(),
            }),
        })
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.inner.settings
    }

    pub fn events(&self) -> &EventSink {
        &self.inner.events
    }

    pub fn store(&self, source: &Path, scope: BackupScope) -> BackupResult<BackupStore> {
        BackupStore::for_scope(scope, source, &self.inner.settings)
    }

    /// Backs up a single file.
    pub async fn capture(&self, source: &Path, kind: BackupKind) -> BackupResult<BackupRecord> {
        self.capture_scoped(source, BackupScope::File, kind).await
    }

    /// Archives a whole project directory.
    pub async fn capture_project(&self, project_dir: &Path, kind: BackupKind) -> BackupResult<BackupRecord> {
        self.capture_scoped(project_dir, BackupScope::Project, kind).await
    }

    pub async fn capture_scoped(
        &self,
        source: &Path,
        scope: BackupScope,
        kind: BackupKind,
    ) -> BackupResult<BackupRecord> {
        let store = match self.store(source, scope) {
            Ok(store) => store,
            Err(e) => {
                self.report_error(source, &e);
                return Err(e);
            }
        };
        let source_path = store.source_path().to_path_buf();
        let _guard = self.inner.locks.acquire(&source_path).await;

        let result = self.capture_locked(store, kind, None).await;
        if let Err(e) = &result {
            self.report_error(&source_path, e);
        }
        result
    }

    /// Caller must hold the lock for the store's source path. Retention after
    /// the capture never removes `pinned`.
    async fn capture_locked(
        &self,
        store: BackupStore,
        kind: BackupKind,
        pinned: Option<PathBuf>,
    ) -> BackupResult<BackupRecord> {
        let inner = Arc::clone(&self.inner);
        let source_path = store.source_path().to_path_buf();
        let (record, removed) = blocking(move || -> BackupResult<(BackupRecord, usize)> {
            let content = read_source(&store, &inner.settings, &inner.excludes)?;
            let record = store.add(&content, kind, Utc::now())?;
            let removed = enforce_retention(&store, &inner.settings.retention_policy(), pinned.as_deref());
            Ok((record, removed))
        })
        .await
        .io_context(|| "backup worker failed")??;

        info!(
            backup_id = %record.id,
            artifact = %record.artifact_path.display(),
            kind = %kind,
            size_bytes = record.size_bytes,
            "backup created"
        );
        let now = Utc::now();
        if removed > 0 {
            info!(removed, source = %source_path.display(), "retention removed old backups");
            self.inner.events.emit(BackupEvent::BackupsCleanedUp {
                source_path,
                removed,
                timestamp: now,
            });
        }
        self.inner.events.emit(BackupEvent::BackupCreated {
            record: record.clone(),
            kind,
            timestamp: now,
        });
        Ok(record)
    }

    /// Records for `source`, newest first.
    pub async fn list(&self, source: &Path, scope: BackupScope) -> BackupResult<Vec<BackupRecord>> {
        let store = self.store(source, scope)?;
        blocking(move || store.list())
            .await
            .io_context(|| "backup worker failed")?
    }

    /// Applies the retention policy to `source` outside of a capture.
    pub async fn cleanup(&self, source: &Path, scope: BackupScope) -> BackupResult<usize> {
        let store = self.store(source, scope)?;
        let source_path = store.source_path().to_path_buf();
        let _guard = self.inner.locks.acquire(&source_path).await;

        let policy = self.inner.settings.retention_policy();
        let removed = blocking(move || enforce_retention(&store, &policy, None))
            .await
            .io_context(|| "backup worker failed")?;
        if removed > 0 {
            self.inner.events.emit(BackupEvent::BackupsCleanedUp {
                source_path,
                removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }

    /// Overwrites `destination` with the content of `artifact`.
    ///
    /// With `backup_current_first`, an existing destination is captured as a
    /// pre-restore backup first; if that capture fails nothing is touched.
    pub async fn restore(
        &self,
        artifact: &Path,
        destination: &Path,
        options: RestoreOptions,
    ) -> Result<(), RestoreError> {
        let artifact = absolute_path(artifact).map_err(|e| RestoreError::io("resolve artifact path", e))?;
        let destination =
            absolute_path(destination).map_err(|e| RestoreError::io("resolve destination path", e))?;

        match self.restore_inner(&artifact, &destination, options).await {
            Ok(()) => {
                info!(
                    artifact = %artifact.display(),
                    destination = %destination.display(),
                    "backup restored"
                );
                self.inner.events.emit(BackupEvent::BackupRestored {
                    backup_path: artifact,
                    destination,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                self.report_error(&destination, &e);
                Err(e)
            }
        }
    }

    async fn restore_inner(
        &self,
        artifact: &Path,
        destination: &Path,
        options: RestoreOptions,
    ) -> Result<(), RestoreError> {
        let _guard = self.inner.locks.acquire(destination).await;

        if !artifact.is_file() {
            return Err(RestoreError::NotFound {
                path: artifact.to_path_buf(),
            });
        }
        let scope = scope_of_artifact(artifact);

        // read before the safety capture, whose retention pass may expire it
        let source = artifact.to_path_buf();
        let bytes = blocking(move || read_artifact(&source))
            .await
            .map_err(|e| RestoreError::io("restore worker failed", e))??;

        if options.backup_current_first && destination.exists() {
            let safety = |source: BackupError| RestoreError::SafetyBackup {
                destination: destination.to_path_buf(),
                source: Box::new(source),
            };
            let store = self.store(destination, scope).map_err(safety)?;
            let record = self
                .capture_locked(store, BackupKind::PreRestore, Some(artifact.to_path_buf()))
                .await
                .map_err(safety)?;
            debug!(artifact = %record.artifact_path.display(), "pre-restore backup captured");
        }

        let destination = destination.to_path_buf();
        let keep: Vec<PathBuf> = absolute_path(&self.inner.settings.data_root).into_iter().collect();
        blocking(move || write_restored(&bytes, &destination, scope, &keep))
            .await
            .map_err(|e| RestoreError::io("restore worker failed", e))?
    }

    /// Explicitly deletes one artifact; unlike retention this may remove the
    /// last copy. Returns `false` when it was already gone.
    pub async fn delete(&self, artifact: &Path) -> BackupResult<bool> {
        let artifact = absolute_path(artifact)
            .io_context(|| format!("resolve artifact path {}", artifact.display()))?;
        let inner = Arc::clone(&self.inner);
        let lookup = artifact.clone();
        let store = blocking(move || BackupStore::for_artifact(&lookup, &inner.settings))
            .await
            .io_context(|| "backup worker failed")??;

        let _guard = self.inner.locks.acquire(store.source_path()).await;
        let target = artifact.clone();
        let removed = blocking(move || -> BackupResult<bool> {
            match store.find(&target)? {
                Some(record) => store.remove(&record),
                None => Ok(false),
            }
        })
        .await
        .io_context(|| "backup worker failed")??;

        if removed {
            info!(artifact = %artifact.display(), "backup deleted");
            self.inner.events.emit(BackupEvent::BackupDeleted {
                backup_path: artifact,
                timestamp: Utc::now(),
            });
        } else {
            debug!(artifact = %artifact.display(), "backup already absent");
        }
        Ok(removed)
    }

    /// Checks that an artifact exists, still has its recorded size and hash,
    /// and (for project archives) decodes.
    pub async fn verify(&self, artifact: &Path) -> BackupResult<VerifyReport> {
        let artifact = absolute_path(artifact)
            .io_context(|| format!("resolve artifact path {}", artifact.display()))?;
        let inner = Arc::clone(&self.inner);
        blocking(move || verify_artifact(&artifact, &inner.settings))
            .await
            .io_context(|| "backup worker failed")?
    }

    fn report_error(&self, path: &Path, err: &dyn Display) {
        error!(path = %path.display(), error = %err, "backup operation failed");
        self.inner.events.emit(BackupEvent::BackupError {
            source_path: path.to_path_buf(),
            message: err.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// One async mutex per path. Entries nobody holds or waits on are dropped on
/// the next acquire.
#[derive(Default)]
struct PathLocks {
    table: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(table.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

async fn blocking<T, F>(work: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(io::Error::other)
}

fn read_source(store: &BackupStore, settings: &BackupSettings, excludes: &ExcludeSet) -> BackupResult<Vec<u8>> {
    let path = store.source_path();
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(BackupError::not_found(path)),
        Err(e) => return Err(BackupError::io(format!("stat source {}", path.display()), e)),
    };
    match store.scope() {
        BackupScope::File => {
            if !meta.is_file() {
                return Err(BackupError::NotAFile {
                    path: path.to_path_buf(),
                    expected: "regular file",
                });
            }
            fs::read(path).io_context(|| format!("read source {}", path.display()))
        }
        BackupScope::Project => {
            if !meta.is_dir() {
                return Err(BackupError::NotAFile {
                    path: path.to_path_buf(),
                    expected: "directory",
                });
            }
            // the data root may live inside the project being archived
            let skip: Vec<PathBuf> = absolute_path(&settings.data_root).into_iter().collect();
            archive::pack_dir(path, excludes, &skip)
                .io_context(|| format!("archive project {}", path.display()))
        }
    }
}

/// Best effort: failures are logged and the record stays for the next pass.
fn enforce_retention(store: &BackupStore, policy: &RetentionPolicy, pinned: Option<&Path>) -> usize {
    let records = match store.list() {
        Ok(records) => records,
        Err(e) => {
            warn!(dir = %store.dir().display(), error = %e, "retention skipped, listing failed");
            return 0;
        }
    };
    let plan = retention::apply(records, policy, Utc::now());

    let mut removed = 0;
    for record in &plan.drop {
        if pinned == Some(record.artifact_path.as_path()) {
            debug!(artifact = %record.artifact_path.display(), "expired backup kept while it is being restored");
            continue;
        }
        match store.remove(record) {
            Ok(true) => {
                removed += 1;
                debug!(artifact = %record.artifact_path.display(), "expired backup removed");
            }
            Ok(false) => {}
            Err(e) => {
                warn!(artifact = %record.artifact_path.display(), error = %e, "failed to remove expired backup")
            }
        }
    }
    removed
}

fn read_artifact(artifact: &Path) -> Result<Vec<u8>, RestoreError> {
    fs::read(artifact).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RestoreError::NotFound {
            path: artifact.to_path_buf(),
        },
        _ => RestoreError::io(format!("read backup artifact {}", artifact.display()), e),
    })
}

fn write_restored(
    bytes: &[u8],
    destination: &Path,
    scope: BackupScope,
    keep: &[PathBuf],
) -> Result<(), RestoreError> {
    let parent = parent_dir(destination);
    fs::create_dir_all(&parent)
        .map_err(|e| RestoreError::io(format!("create directory {}", parent.display()), e))?;

    match scope {
        BackupScope::File => StagedFile::stage(&parent, bytes)
            .and_then(|staged| staged.commit(destination))
            .map_err(|e| RestoreError::io(format!("write {}", destination.display()), e)),
        BackupScope::Project => swap_in_project(bytes, &parent, destination, keep)
            .map_err(|e| RestoreError::io(format!("restore project into {}", destination.display()), e)),
    }
}

/// Unpacks next to `destination`, then swaps the tree into place so a failed
/// unpack never leaves a half-restored project. `.backups` directories and
/// the `keep` directories are moved from the old tree into the new one.
fn swap_in_project(
    archive_bytes: &[u8],
    parent: &Path,
    destination: &Path,
    keep: &[PathBuf],
) -> io::Result<()> {
    let staging = tempfile::Builder::new().prefix(".wb-restore-").tempdir_in(parent)?;
    archive::unpack(archive_bytes, staging.path())?;

    let displaced = if destination.exists() {
        let aside = parent.join(format!(".wb-displaced-{}", Uuid::new_v4().simple()));
        fs::rename(destination, &aside)?;
        Some(aside)
    } else {
        None
    };

    if let Err(e) = fs::rename(staging.path(), destination) {
        if let Some(aside) = &displaced {
            if let Err(undo) = fs::rename(aside, destination) {
                error!(
                    displaced = %aside.display(),
                    error = %undo,
                    "could not move original project back after failed restore"
                );
            }
        }
        return Err(e);
    }

    if let Some(aside) = displaced {
        if aside.is_dir() {
            if let Err(e) = carry_over(&aside, destination, keep) {
                warn!(
                    previous = %aside.display(),
                    error = %e,
                    "could not move backups out of the replaced project, leaving it in place"
                );
                return Ok(());
            }
        }
        let removal = if aside.is_dir() {
            fs::remove_dir_all(&aside)
        } else {
            fs::remove_file(&aside)
        };
        if let Err(e) = removal {
            warn!(path = %aside.display(), error = %e, "failed to remove replaced project copy");
        }
    }
    Ok(())
}

fn carry_over(old_root: &Path, new_root: &Path, keep: &[PathBuf]) -> io::Result<()> {
    let mut moves = Vec::new();
    let mut walker = WalkDir::new(old_root).follow_links(false).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let rel = entry.path().strip_prefix(old_root).map_err(io::Error::other)?;
        let target = new_root.join(rel);
        if entry.file_name() == BACKUP_DIR_NAME || keep.contains(&target) {
            walker.skip_current_dir();
            moves.push((entry.into_path(), target));
        }
    }

    for (from, to) in moves {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&from, &to)?;
    }
    Ok(())
}

fn verify_artifact(artifact: &Path, settings: &BackupSettings) -> BackupResult<VerifyReport> {
    let store = BackupStore::for_artifact(artifact, settings)?;
    let Some(record) = store.find(artifact)? else {
        return Ok(VerifyReport::missing(artifact.to_path_buf()));
    };

    let path = &record.artifact_path;
    let actual_size = fs::metadata(path)
        .io_context(|| format!("stat backup artifact {}", path.display()))?
        .len();
    let hash_matches = match &record.content_hash {
        Some(expected) => {
            let actual = file_hash(path).io_context(|| format!("hash backup artifact {}", path.display()))?;
            Some(&actual == expected)
        }
        None => None,
    };
    let archive_readable = match store.scope() {
        BackupScope::Project => Some(
            fs::read(path)
                .and_then(|bytes| archive::entry_count(&bytes))
                .is_ok(),
        ),
        BackupScope::File => None,
    };

    Ok(VerifyReport {
        artifact_path: record.artifact_path.clone(),
        exists: true,
        size_matches: actual_size == record.size_bytes,
        hash_matches,
        archive_readable,
    })
}
