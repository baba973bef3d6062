//! Deferred, idempotent removal of upload directories.
//!
//! Cleanup never blocks the request that scheduled it: the directory is
//! removed by a background task once its grace period has elapsed. A janitor
//! sweep catches directories whose task never ran, e.g. after a restart.

use crate::core::config::CleanupConfig;
use crate::core::{ClassifyError, ClassifyResult};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a cleanup found when it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The directory existed and was deleted.
    Removed,
    /// The directory was already gone.
    AlreadyAbsent,
}

/// Deletes `path` recursively, treating a missing directory as success.
///
/// Transient failures are retried up to `max_attempts` times, `retry_delay`
/// apart.
pub async fn remove_session_dir(
    path: &Path,
    max_attempts: u32,
    retry_delay: Duration,
) -> ClassifyResult<CleanupOutcome> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => return Ok(CleanupOutcome::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CleanupOutcome::AlreadyAbsent),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "cleanup of '{}' failed (attempt {attempt}/{max_attempts}): {e}",
                    path.display()
                );
                attempt += 1;
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => return Err(ClassifyError::storage("remove", path, e)),
        }
    }
}

type Completion = Result<CleanupOutcome, (ErrorKind, String)>;

/// A scheduled cleanup.
///
/// Clones observe the same deletion. Dropping every handle leaves the cleanup
/// running in the background.
#[derive(Debug, Clone)]
pub struct CleanupHandle {
    path: PathBuf,
    done: watch::Receiver<Option<Completion>>,
    abort: Arc<AbortHandle>,
}

impl CleanupHandle {
    /// The directory this cleanup targets.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the cleanup has run to completion.
    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }

    /// Waits for the cleanup to run and returns what it found.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Storage`] if deletion kept failing or the
    /// cleanup was cancelled.
    pub async fn wait(&self) -> ClassifyResult<CleanupOutcome> {
        let mut done = self.done.clone();
        let completion = match done.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        match completion {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err((kind, message))) => Err(ClassifyError::storage(
                "remove",
                &self.path,
                std::io::Error::new(kind, message),
            )),
            None => Err(ClassifyError::storage(
                "remove",
                &self.path,
                std::io::Error::new(ErrorKind::Interrupted, "cleanup was cancelled"),
            )),
        }
    }

    /// Cancels the cleanup if it has not started deleting yet.
    ///
    /// The directory is left in place for the janitor to collect.
    pub fn cancel(&self) {
        debug!("cancelled cleanup of '{}'", self.path.display());
        self.abort.abort();
    }
}

/// Ids of sessions whose directories are still in use.
///
/// A session is live from creation until its cleanup task finishes or is
/// cancelled. Sweeps never touch live sessions, however old their directory.
#[derive(Debug, Clone, Default)]
pub struct LiveSessions {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl LiveSessions {
    /// Marks `id` as in use.
    pub fn register(&self, id: Uuid) {
        self.lock().insert(id);
    }

    /// Marks `id` as no longer in use.
    pub fn release(&self, id: Uuid) {
        self.lock().remove(&id);
    }

    /// True while `id` is in use.
    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains(&id)
    }

    /// Number of sessions in use.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no session is in use.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases a live session when the cleanup task ends, including on abort.
struct ReleaseOnDrop {
    live: LiveSessions,
    id: Option<Uuid>,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.live.release(id);
        }
    }
}

fn session_id(path: &Path) -> Option<Uuid> {
    path.file_name()
        .and_then(|name| Uuid::parse_str(&name.to_string_lossy()).ok())
}

#[derive(Debug)]
struct SchedulerState {
    live: LiveSessions,
    pending: Mutex<Vec<CleanupHandle>>,
    flush: watch::Sender<bool>,
}

/// Spawns deferred cleanup tasks on a Tokio runtime.
///
/// Holds a runtime handle rather than relying on an ambient one, so cleanup
/// can be scheduled from `Drop` and from blocking threads. Clones share the
/// same live-session set and pending cleanups.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    runtime: Handle,
    config: CleanupConfig,
    state: Arc<SchedulerState>,
}

impl CleanupScheduler {
    /// Creates a scheduler on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Config`] when called outside a runtime.
    pub fn new(config: CleanupConfig) -> ClassifyResult<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            ClassifyError::config_error(format!("cleanup scheduler needs a Tokio runtime: {e}"))
        })?;
        Ok(Self::with_handle(runtime, config))
    }

    /// Creates a scheduler spawning onto `runtime`.
    pub fn with_handle(runtime: Handle, config: CleanupConfig) -> Self {
        let (flush, _) = watch::channel(false);
        Self {
            runtime,
            config,
            state: Arc::new(SchedulerState {
                live: LiveSessions::default(),
                pending: Mutex::new(Vec::new()),
                flush,
            }),
        }
    }

    /// The timing this scheduler applies.
    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    /// Sessions currently protected from sweeps.
    pub fn live_sessions(&self) -> &LiveSessions {
        &self.state.live
    }

    /// Removes `path` after the configured grace period.
    pub fn schedule(&self, path: PathBuf) -> CleanupHandle {
        self.schedule_after(path, self.config.grace_period())
    }

    /// Removes `path` after `grace`, or as soon as [`CleanupScheduler::shutdown`]
    /// is called.
    ///
    /// If `path` is named after a live session, the session is released when
    /// the task finishes or is cancelled.
    pub fn schedule_after(&self, path: PathBuf, grace: Duration) -> CleanupHandle {
        debug!("cleanup of '{}' scheduled in {grace:?}", path.display());
        let max_attempts = self.config.max_attempts;
        let retry_delay = self.config.retry_delay();
        let target = path.clone();
        let release = ReleaseOnDrop {
            live: self.state.live.clone(),
            id: session_id(&path),
        };
        let mut flush = self.state.flush.subscribe();

        let (tx, done) = watch::channel(None);

        let task = self.runtime.spawn(async move {
            let release = release;
            let flushed = async {
                let closed = flush.wait_for(|flushing| *flushing).await.is_err();
                if closed {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(grace) => {}
                _ = flushed => debug!("flushing cleanup of '{}'", target.display()),
            }

            let outcome = remove_session_dir(&target, max_attempts, retry_delay).await;
            let completion = match outcome {
                Ok(CleanupOutcome::Removed) => {
                    info!("removed upload dir '{}'", target.display());
                    Ok(CleanupOutcome::Removed)
                }
                Ok(CleanupOutcome::AlreadyAbsent) => {
                    debug!("upload dir '{}' already removed", target.display());
                    Ok(CleanupOutcome::AlreadyAbsent)
                }
                Err(e) => {
                    error!("giving up on upload dir '{}': {e}", target.display());
                    match e {
                        ClassifyError::Storage { source, .. } => {
                            Err((source.kind(), source.to_string()))
                        }
                        other => Err((ErrorKind::Other, other.to_string())),
                    }
                }
            };
            drop(release);
            // Nobody may be waiting.
            let _ = tx.send(Some(completion));
        });

        let handle = CleanupHandle {
            path,
            done,
            abort: Arc::new(task.abort_handle()),
        };
        let mut pending = self
            .state
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle.clone());
        handle
    }

    /// Runs every pending cleanup now, without waiting out grace periods,
    /// and waits for them to finish.
    ///
    /// Cleanups scheduled afterwards also run immediately. Returns how many
    /// cleanups were drained; failures are logged.
    pub async fn shutdown(&self) -> usize {
        self.state.flush.send_replace(true);
        let pending = std::mem::take(
            &mut *self
                .state
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let drained = pending.len();
        for handle in pending {
            if let Err(e) = handle.wait().await {
                warn!("cleanup during shutdown failed: {e}");
            }
        }
        if drained > 0 {
            info!("drained {drained} pending upload cleanups");
        }
        drained
    }

    /// Sweeps `root` now with this scheduler's grace period as the age cutoff.
    pub async fn sweep(&self, root: &Path) -> ClassifyResult<usize> {
        sweep_orphans(root, self.config.grace_period(), &self.state.live).await
    }

    /// Starts the periodic janitor over `root`, if an interval is configured.
    pub fn spawn_janitor(&self, root: PathBuf) -> Option<JoinHandle<()>> {
        let interval = self.config.sweep_interval()?;
        let max_age = self.config.grace_period();
        Some(spawn_janitor(
            &self.runtime,
            root,
            max_age,
            interval,
            self.state.live.clone(),
        ))
    }
}

/// Deletes session directories under `root` older than `max_age`.
///
/// Only entries named like a session id are touched, and never a session in
/// `live`. Returns how many were removed. A missing `root` is not an error.
pub async fn sweep_orphans(
    root: &Path,
    max_age: Duration,
    live: &LiveSessions,
) -> ClassifyResult<usize> {
    if !tokio::fs::try_exists(root)
        .await
        .map_err(|e| ClassifyError::storage("sweep", root, e))?
    {
        return Ok(0);
    }

    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| ClassifyError::storage("sweep", root, e))?;
    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ClassifyError::storage("sweep", root, e))?
    {
        let Ok(id) = Uuid::parse_str(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        if live.contains(id) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("failed to sweep '{}': {e}", path.display()),
        }
    }

    if removed > 0 {
        info!("swept {removed} orphaned upload dirs from '{}'", root.display());
    }
    Ok(removed)
}

/// Runs [`sweep_orphans`] over `root` every `interval`, starting one interval
/// from now.
pub fn spawn_janitor(
    runtime: &Handle,
    root: PathBuf,
    max_age: Duration,
    interval: Duration,
    live: LiveSessions,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_orphans(&root, max_age, &live).await {
                error!("upload janitor sweep failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CleanupConfig {
        CleanupConfig {
            grace_period_secs: 0,
            max_attempts: 2,
            retry_delay_ms: 10,
            sweep_interval_secs: 0,
        }
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("cat.jpg"), b"x").unwrap();

        let delay = Duration::from_millis(1);
        assert_eq!(
            remove_session_dir(&dir, 3, delay).await.unwrap(),
            CleanupOutcome::Removed
        );
        assert!(!dir.exists());
        assert_eq!(
            remove_session_dir(&dir, 3, delay).await.unwrap(),
            CleanupOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn test_scheduled_cleanup_waits_for_grace() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session");
        std::fs::create_dir(&dir).unwrap();

        let scheduler = CleanupScheduler::new(config()).unwrap();
        let handle = scheduler.schedule_after(dir.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dir.exists());

        assert_eq!(handle.wait().await.unwrap(), CleanupOutcome::Removed);
        assert!(!dir.exists());

        let again = scheduler.schedule(dir.clone());
        assert_eq!(again.wait().await.unwrap(), CleanupOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_cancelled_cleanup_leaves_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("session");
        std::fs::create_dir(&dir).unwrap();

        let scheduler = CleanupScheduler::new(config()).unwrap();
        let handle = scheduler.schedule_after(dir.clone(), Duration::from_secs(60));
        handle.cancel();
        assert!(matches!(
            handle.wait().await,
            Err(ClassifyError::Storage { .. })
        ));
        assert!(dir.exists());
    }

    #[test]
    fn test_scheduler_requires_runtime() {
        assert!(matches!(
            CleanupScheduler::new(config()),
            Err(ClassifyError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_old_session_dirs() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join(Uuid::new_v4().to_string());
        let unrelated = root.path().join("keep-me");
        let stray_file = root.path().join(Uuid::new_v4().to_string());
        std::fs::create_dir(&session).unwrap();
        std::fs::create_dir(&unrelated).unwrap();
        std::fs::write(&stray_file, b"x").unwrap();
        let live = LiveSessions::default();

        // Nothing is old enough yet.
        assert_eq!(
            sweep_orphans(root.path(), Duration::from_secs(3600), &live)
                .await
                .unwrap(),
            0
        );
        assert!(session.exists());

        assert_eq!(
            sweep_orphans(root.path(), Duration::ZERO, &live)
                .await
                .unwrap(),
            1
        );
        assert!(!session.exists());
        assert!(unrelated.exists());
        assert!(stray_file.exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        assert_eq!(
            sweep_orphans(&missing, Duration::ZERO, &LiveSessions::default())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_janitor_sweeps_periodically() {
        let root = tempfile::tempdir().unwrap();
        let session = root.path().join(Uuid::new_v4().to_string());
        std::fs::create_dir(&session).unwrap();

        let janitor = spawn_janitor(
            &Handle::current(),
            root.path().to_path_buf(),
            Duration::ZERO,
            Duration::from_millis(20),
            LiveSessions::default(),
        );
        for _ in 0..100 {
            if !session.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        janitor.abort();
        assert!(!session.exists());
    }

    #[tokio::test]
    async fn test_sweep_skips_live_sessions() {
        let root = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let session = root.path().join(id.to_string());
        std::fs::create_dir(&session).unwrap();

        let live = LiveSessions::default();
        live.register(id);
        assert_eq!(
            sweep_orphans(root.path(), Duration::ZERO, &live)
                .await
                .unwrap(),
            0
        );
        assert!(session.exists());

        live.release(id);
        assert_eq!(
            sweep_orphans(root.path(), Duration::ZERO, &live)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_finished_or_cancelled_cleanup_releases_session() {
        let root = tempfile::tempdir().unwrap();
        let scheduler = CleanupScheduler::new(config()).unwrap();
        let live = scheduler.live_sessions().clone();

        let done_id = Uuid::new_v4();
        let done_dir = root.path().join(done_id.to_string());
        std::fs::create_dir(&done_dir).unwrap();
        live.register(done_id);
        scheduler.schedule(done_dir).wait().await.unwrap();
        assert!(!live.contains(done_id));

        let cancelled_id = Uuid::new_v4();
        let cancelled_dir = root.path().join(cancelled_id.to_string());
        std::fs::create_dir(&cancelled_dir).unwrap();
        live.register(cancelled_id);
        let handle = scheduler.schedule_after(cancelled_dir.clone(), Duration::from_secs(60));
        handle.cancel();
        assert!(handle.wait().await.is_err());
        assert!(!live.contains(cancelled_id));

        // The janitor may now collect what the cancelled cleanup left behind.
        assert_eq!(scheduler.sweep(root.path()).await.unwrap(), 1);
        assert!(!cancelled_dir.exists());
    }

    #[tokio::test]
    async fn test_shutdown_runs_pending_cleanups_now() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("first");
        let second = root.path().join("second");
        std::fs::create_dir(&first).unwrap();
        std::fs::create_dir(&second).unwrap();

        let scheduler = CleanupScheduler::new(config()).unwrap();
        let handle = scheduler.schedule_after(first.clone(), Duration::from_secs(3600));
        scheduler.schedule_after(second.clone(), Duration::from_secs(3600));

        let started = std::time::Instant::now();
        assert_eq!(scheduler.shutdown().await, 2);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert!(!first.exists());
        assert!(!second.exists());
        assert_eq!(handle.wait().await.unwrap(), CleanupOutcome::Removed);

        // Later cleanups skip the grace period as well.
        let late = root.path().join("late");
        std::fs::create_dir(&late).unwrap();
        scheduler
            .schedule_after(late.clone(), Duration::from_secs(3600))
            .wait()
            .await
            .unwrap();
        assert!(!late.exists());
    }
}
