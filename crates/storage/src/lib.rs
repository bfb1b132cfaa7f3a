pub mod archive;
pub mod atomic;
mod engine;
mod events;
mod index;
pub mod store;

pub use engine::{BackupEngine, RestoreOptions, VerifyReport};
pub use events::EventSink;
pub use index::{IndexEntry, RecordIndex};
pub use store::{BackupStore, StoreStats};
