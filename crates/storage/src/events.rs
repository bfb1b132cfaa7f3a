use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;
use writers_backup_core::BackupEvent;

/// Where lifecycle events go. Handed to the engine and scheduler at
/// construction; a disabled sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<BackupEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<BackupEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, UnboundedReceiver<BackupEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: BackupEvent) {
        trace!(event = event.name(), path = %event.path().display(), "emit");
        if let Some(tx) = &self.tx {
            // a closed receiver just means nobody is listening any more
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;

    use super::*;

    #[test]
    fn channel_delivers_and_disabled_drops() {
        let (sink, mut rx) = EventSink::channel();
        let event = BackupEvent::BackupDeleted {
            backup_path: PathBuf::from("/x/.backups/a"),
            timestamp: Utc::now(),
        };
        sink.emit(event.clone());
        assert_eq!(rx.try_recv().expect("event"), event);

        EventSink::disabled().emit(event);
        drop(sink);
        assert!(rx.try_recv().is_err());
    }
}
