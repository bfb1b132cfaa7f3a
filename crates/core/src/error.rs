use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type BackupResult<T> = Result<T, BackupError>;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("{} is not a {expected}", path.display())]
    NotAFile {
        path: PathBuf,
        expected: &'static str,
    },
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
}

impl BackupError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        BackupError::NotFound { path: path.into() }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        BackupError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("backup artifact not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("safety backup of {} failed; restore aborted", destination.display())]
    SafetyBackup {
        destination: PathBuf,
        #[source]
        source: Box<BackupError>,
    },
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl RestoreError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        RestoreError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// `with_context` for `io::Result`, producing typed errors instead of
/// `anyhow` ones.
pub trait IoContext<T> {
    fn io_context<C, F>(self, context: F) -> BackupResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<C, F>(self, context: F) -> BackupResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| BackupError::io(context(), source))
    }
}
