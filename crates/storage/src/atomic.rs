use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

const TEMP_PREFIX: &str = ".wb-tmp-";
const TEMP_SUFFIX: &str = ".partial";

/// Content written to a temporary file next to its final location, waiting to
/// be renamed into place. Dropping it without committing removes the
/// temporary file, so readers never see partial artifacts.
pub struct StagedFile {
    inner: NamedTempFile,
}

impl StagedFile {
    pub fn stage(dir: &Path, content: &[u8]) -> io::Result<Self> {
        let mut inner = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?;
        inner.write_all(content)?;
        inner.as_file().sync_all()?;
        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Renames over `target`, replacing whatever is there.
    pub fn commit(self, target: &Path) -> io::Result<()> {
        self.inner.persist(target).map(drop).map_err(|e| e.error)
    }

    /// Renames to `target` only if nothing exists there yet. On failure the
    /// staged file is handed back so the caller can pick another name.
    pub fn commit_new(self, target: &Path) -> Result<(), (Self, io::Error)> {
        self.inner
            .persist_noclobber(target)
            .map(drop)
            .map_err(|e| (Self { inner: e.file }, e.error))
    }
}

/// Atomically replaces `target` with `content`.
pub fn write_atomic(target: &Path, content: &[u8]) -> io::Result<()> {
    let dir = parent_dir(target);
    StagedFile::stage(&dir, content)?.commit(target)
}

/// True for names produced by [`StagedFile`].
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
}

pub(crate) fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
