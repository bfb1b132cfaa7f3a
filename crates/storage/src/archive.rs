//! Whole-project archives: a tar stream of the project tree, zstd-compressed.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::store::BACKUP_DIR_NAME;

const ZSTD_LEVEL: i32 = 3;

/// Compiled `exclude_patterns`. A pattern ending in `/` only matches
/// directories; every other pattern is a glob tried against both the entry
/// name and its path relative to the project root. `*` never crosses `/`.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    any: GlobSet,
    dirs: GlobSet,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self, globset::Error> {
        let mut any = GlobSetBuilder::new();
        let mut dirs = GlobSetBuilder::new();
        for pattern in patterns {
            match pattern.strip_suffix('/') {
                Some(dir) => dirs.add(glob(dir)?),
                None => any.add(glob(pattern)?),
            };
        }
        Ok(Self {
            any: any.build()?,
            dirs: dirs.build()?,
        })
    }

    pub fn empty() -> Self {
        Self {
            any: GlobSet::empty(),
            dirs: GlobSet::empty(),
        }
    }

    pub fn is_excluded(&self, rel: &Path, is_dir: bool) -> bool {
        let name = rel.file_name().map(Path::new).unwrap_or(rel);
        let hit = |set: &GlobSet| set.is_match(name) || set.is_match(rel);
        hit(&self.any) || (is_dir && hit(&self.dirs))
    }
}

/// Archives `root` recursively, skipping entries matched by `exclude`, any
/// `.backups` directory and the directories in `skip` (compared as given, so
/// pass them in the same absolute form as `root`).
pub fn pack_dir(root: &Path, exclude: &ExcludeSet, skip: &[PathBuf]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| wanted(entry, root, exclude, skip));
    for entry in walker {
        let entry = entry?;
        let rel = entry.path().strip_prefix(root).map_err(io::Error::other)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else if file_type.is_file() {
            builder.append_path_with_name(entry.path(), rel)?;
        }
    }

    let tar_data = builder.into_inner()?;
    zstd::encode_all(Cursor::new(tar_data), ZSTD_LEVEL)
}

/// Unpacks an archive produced by [`pack_dir`] into `dest`.
pub fn unpack(archive: &[u8], dest: &Path) -> io::Result<()> {
    let tar_data = zstd::decode_all(Cursor::new(archive))?;
    fs::create_dir_all(dest)?;
    tar::Archive::new(Cursor::new(tar_data)).unpack(dest)
}

/// Number of entries in an archive; fails if it can not be fully decoded.
pub fn entry_count(archive: &[u8]) -> io::Result<usize> {
    let tar_data = zstd::decode_all(Cursor::new(archive))?;
    let mut reader = tar::Archive::new(Cursor::new(tar_data));
    let mut count = 0;
    for entry in reader.entries()? {
        entry?;
        count += 1;
    }
    Ok(count)
}

fn glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

fn wanted(entry: &DirEntry, root: &Path, exclude: &ExcludeSet, skip: &[PathBuf]) -> bool {
    let Ok(rel) = entry.path().strip_prefix(root) else {
        return true;
    };
    if rel.as_os_str().is_empty() {
        return true;
    }
    let is_dir = entry.file_type().is_dir();
    if is_dir && (entry.file_name() == BACKUP_DIR_NAME || skip.iter().any(|s| s == entry.path())) {
        return false;
    }
    !exclude.is_excluded(rel, is_dir)
}
