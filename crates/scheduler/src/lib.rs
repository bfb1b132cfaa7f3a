use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use writers_backup_core::settings::validate_interval_ms;
use writers_backup_core::{BackupEvent, BackupKind, BackupResult, BackupScope, IoContext, StopReason};
use writers_backup_storage::store::absolute_path;
use writers_backup_storage::{BackupEngine, EventSink};

/// The work done on every timer tick.
#[async_trait]
pub trait AutoCapture: Send + Sync + 'static {
    async fn capture_automatic(&self, source: &Path, scope: BackupScope) -> BackupResult<()>;
}

#[async_trait]
impl AutoCapture for BackupEngine {
    async fn capture_automatic(&self, source: &Path, scope: BackupScope) -> BackupResult<()> {
        self.capture_scoped(source, scope, BackupKind::Automatic)
            .await
            .map(|_| ())
    }
}

/// Periodic automatic backups, one timer per source path.
///
/// Dropping the scheduler cancels every timer without waiting; call
/// [`AutoBackupScheduler::stop_all`] to wait for in-flight captures.
pub struct AutoBackupScheduler<C: AutoCapture> {
    shared: Arc<Shared<C>>,
    next_id: AtomicU64,
}

struct Shared<C> {
    capture: C,
    events: EventSink,
    timers: Mutex<HashMap<PathBuf, Timer>>,
}

struct Timer {
    id: u64,
    scope: BackupScope,
    interval: Duration,
    last_fired_at: Option<DateTime<Utc>>,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<C: AutoCapture> Shared<C> {
    fn timers(&self) -> MutexGuard<'_, HashMap<PathBuf, Timer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the registration only if it still belongs to timer `id`.
    fn deregister(&self, source: &Path, id: u64) -> bool {
        let mut timers = self.timers();
        if timers.get(source).is_some_and(|t| t.id == id) {
            timers.remove(source);
            true
        } else {
            false
        }
    }

    fn mark_fired(&self, source: &Path, id: u64, at: DateTime<Utc>) {
        if let Some(timer) = self.timers().get_mut(source).filter(|t| t.id == id) {
            timer.last_fired_at = Some(at);
        }
    }

    fn emit_stopped(&self, source_path: PathBuf, reason: StopReason) {
        self.events.emit(BackupEvent::AutoBackupStopped {
            source_path,
            reason,
            timestamp: Utc::now(),
        });
    }
}

impl<C: AutoCapture> AutoBackupScheduler<C> {
    pub fn new(capture: C, events: EventSink) -> Self {
        Self {
            shared: Arc::new(Shared {
                capture,
                events,
                timers: Mutex::new(HashMap::new()),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capture(&self) -> &C {
        &self.shared.capture
    }

    /// Starts backing up a single file every `interval`.
    pub fn start(&self, source: &Path, interval: Duration) -> BackupResult<()> {
        self.start_scoped(source, BackupScope::File, interval)
    }

    /// Registers a timer for `source`, replacing any existing one. The first
    /// capture happens one full interval after registration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_scoped(&self, source: &Path, scope: BackupScope, interval: Duration) -> BackupResult<()> {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        validate_interval_ms(interval_ms)?;
        let source = absolute_path(source)
            .io_context(|| format!("resolve source path {}", source.display()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.shared),
            source.clone(),
            scope,
            id,
            interval,
            cancelled,
        ));

        let previous = self.shared.timers().insert(
            source.clone(),
            Timer {
                id,
                scope,
                interval,
                last_fired_at: None,
                cancel,
                handle,
            },
        );
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
            debug!(source = %source.display(), "replaced existing auto-backup timer");
        }

        info!(source = %source.display(), interval_ms, ?scope, "auto-backup started");
        self.shared.events.emit(BackupEvent::AutoBackupStarted {
            source_path: source,
            interval_ms,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Cancels the timer for `source`. A capture already running finishes.
    /// Returns `false` if nothing was registered.
    pub fn stop(&self, source: &Path) -> bool {
        let source = lookup_key(source);
        let Some(timer) = self.shared.timers().remove(&source) else {
            return false;
        };
        let _ = timer.cancel.send(true);
        info!(source = %source.display(), "auto-backup stopped");
        self.shared.emit_stopped(source, StopReason::Requested);
        true
    }

    /// Cancels every timer and waits for their tasks, including any capture
    /// in flight. Returns how many timers were stopped.
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<(PathBuf, Timer)> = self.shared.timers().drain().collect();
        for (_, timer) in &drained {
            let _ = timer.cancel.send(true);
        }

        let stopped = drained.len();
        for (source, timer) in drained {
            if let Err(e) = timer.handle.await {
                warn!(source = %source.display(), error = %e, "auto-backup task ended abnormally");
            }
            self.shared.emit_stopped(source, StopReason::Shutdown);
        }
        if stopped > 0 {
            info!(stopped, "all auto-backup timers stopped");
        }
        stopped
    }

    pub fn is_registered(&self, source: &Path) -> bool {
        self.shared.timers().contains_key(&lookup_key(source))
    }

    /// Registered sources in path order.
    pub fn registered_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.shared.timers().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn interval(&self, source: &Path) -> Option<Duration> {
        self.shared.timers().get(&lookup_key(source)).map(|t| t.interval)
    }

    pub fn scope(&self, source: &Path) -> Option<BackupScope> {
        self.shared.timers().get(&lookup_key(source)).map(|t| t.scope)
    }

    /// When the timer for `source` last started a capture.
    pub fn last_fired_at(&self, source: &Path) -> Option<DateTime<Utc>> {
        self.shared
            .timers()
            .get(&lookup_key(source))
            .and_then(|t| t.last_fired_at)
    }
}

impl<C: AutoCapture> Drop for AutoBackupScheduler<C> {
    fn drop(&mut self) {
        for timer in self.shared.timers().values() {
            let _ = timer.cancel.send(true);
        }
    }
}

fn lookup_key(path: &Path) -> PathBuf {
    absolute_path(path).unwrap_or_else(|_| path.to_path_buf())
}

async fn run_timer<C: AutoCapture>(
    shared: Arc<Shared<C>>,
    source: PathBuf,
    scope: BackupScope,
    id: u64,
    period: Duration,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // cancellation is only observed between captures
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancelled.changed() => break,
        }
        if *cancelled.borrow() {
            break;
        }

        if !source.exists() {
            if shared.deregister(&source, id) {
                info!(source = %source.display(), "source disappeared, auto-backup stopped");
                shared.emit_stopped(source.clone(), StopReason::SourceMissing);
            }
            break;
        }

        shared.mark_fired(&source, id, Utc::now());
        match shared.capture.capture_automatic(&source, scope).await {
            Ok(()) => debug!(source = %source.display(), "automatic backup taken"),
            Err(e) => warn!(source = %source.display(), error = %e, "automatic backup failed"),
        }
    }
    debug!(source = %source.display(), timer = id, "auto-backup timer exited");
}
