pub mod error;
pub mod event;
pub mod hash;
pub mod naming;
pub mod record;
pub mod retention;
pub mod settings;

pub use error::{BackupError, BackupResult, ConfigError, IoContext, RestoreError};
pub use event::{BackupEvent, StopReason};
pub use hash::{content_hash, file_hash};
pub use naming::ArtifactName;
pub use record::{new_record_id, sort_newest_first, BackupKind, BackupRecord, BackupScope};
pub use retention::{RetentionPlan, RetentionPolicy};
pub use settings::BackupSettings;
