//! Per-request upload storage.

use super::cleanup::{CleanupHandle, CleanupScheduler};
use crate::core::{ClassifyError, ClassifyResult};
use crate::utils::validate_image_id;
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// One upload: a uniquely named directory holding the submitted file.
#[derive(Debug, Clone)]
pub struct UploadSession {
    id: Uuid,
    dir: PathBuf,
    image_id: String,
    model_id: String,
}

impl UploadSession {
    /// The session identifier, also the directory name.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The session directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The submitted file name.
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    /// The requested model.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Location of the stored file.
    pub fn image_path(&self) -> PathBuf {
        self.dir.join(&self.image_id)
    }

    /// Checks that both an image and a model were supplied.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Validation`] listing every missing field.
    pub fn validate(&self) -> ClassifyResult<()> {
        let mut violations = Vec::new();
        if self.image_id.is_empty() {
            violations.push("A valid image id is required".to_string());
        }
        if self.model_id.is_empty() {
            violations.push("A valid model id is required".to_string());
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ClassifyError::Validation { violations })
        }
    }
}

/// Owns an [`UploadSession`] and guarantees its directory gets cleaned up.
///
/// Cleanup is scheduled exactly once: explicitly through
/// [`SessionGuard::schedule_cleanup`] or [`SessionGuard::finish`], or on drop
/// if the guard is abandoned on an error path.
#[derive(Debug)]
pub struct SessionGuard {
    session: UploadSession,
    scheduler: CleanupScheduler,
    cleanup: OnceCell<CleanupHandle>,
}

impl SessionGuard {
    fn new(session: UploadSession, scheduler: CleanupScheduler) -> Self {
        Self {
            session,
            scheduler,
            cleanup: OnceCell::new(),
        }
    }

    /// The guarded session.
    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Schedules removal of the session directory after the grace period.
    ///
    /// Does not wait. Repeated calls return a handle to the same deletion.
    pub fn schedule_cleanup(&self) -> CleanupHandle {
        self.cleanup
            .get_or_init(|| self.scheduler.schedule(self.session.dir.clone()))
            .clone()
    }

    /// Schedules cleanup if needed and releases the guard.
    pub fn finish(self) -> CleanupHandle {
        self.schedule_cleanup()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.cleanup.get().is_none() {
            debug!("session {} abandoned, scheduling cleanup", self.session.id);
            self.schedule_cleanup();
        }
    }
}

/// Creates upload sessions under a common root directory.
///
/// A session counts as live from [`UploadManager::begin_upload`] until its
/// cleanup has run; sweeps leave live sessions alone.
#[derive(Debug, Clone)]
pub struct UploadManager {
    root: PathBuf,
    scheduler: CleanupScheduler,
}

impl UploadManager {
    /// Creates a manager storing sessions under `root`.
    pub fn new(root: impl Into<PathBuf>, scheduler: CleanupScheduler) -> Self {
        Self {
            root: root.into(),
            scheduler,
        }
    }

    /// The directory sessions are created in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The scheduler used for session cleanup.
    pub fn scheduler(&self) -> &CleanupScheduler {
        &self.scheduler
    }

    /// Stores `bytes` as `filename` in a fresh session directory.
    ///
    /// An empty `filename` still creates the session but writes nothing, so
    /// [`UploadSession::validate`] can report it. Once the directory exists,
    /// every exit path leads to its cleanup.
    ///
    /// # Errors
    ///
    /// * [`ClassifyError::InvalidImageId`] if `filename` is not a plain file
    ///   name. Nothing is created in that case.
    /// * [`ClassifyError::Storage`] if the directory or file cannot be written.
    pub async fn begin_upload(
        &self,
        bytes: &[u8],
        filename: &str,
        model_id: &str,
    ) -> ClassifyResult<SessionGuard> {
        if !filename.is_empty() {
            validate_image_id(filename)?;
        }

        let id = Uuid::new_v4();
        let dir = self.root.join(id.to_string());
        let live = self.scheduler.live_sessions();
        // Registered before the directory exists so no sweep can see it unprotected.
        live.register(id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            live.release(id);
            return Err(ClassifyError::storage("create", &dir, e));
        }

        let guard = SessionGuard::new(
            UploadSession {
                id,
                dir,
                image_id: filename.to_string(),
                model_id: model_id.to_string(),
            },
            self.scheduler.clone(),
        );

        if !filename.is_empty() {
            let path = guard.session().image_path();
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| ClassifyError::storage("write", &path, e))?;
        }

        info!(
            "upload session {id} stored '{filename}' ({} bytes)",
            bytes.len()
        );
        Ok(guard)
    }

    /// Removes session directories older than the grace period, except those
    /// of sessions still in use.
    pub async fn sweep(&self) -> ClassifyResult<usize> {
        self.scheduler.sweep(&self.root).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::cleanup::CleanupOutcome;
    use super::*;
    use crate::core::config::CleanupConfig;
    use std::collections::HashSet;
    use std::time::Duration;

    fn manager(root: &Path) -> UploadManager {
        let scheduler = CleanupScheduler::new(CleanupConfig {
            grace_period_secs: 0,
            max_attempts: 2,
            retry_delay_ms: 10,
            sweep_interval_secs: 0,
        })
        .unwrap();
        UploadManager::new(root, scheduler)
    }

    async fn wait_until_gone(path: &Path) {
        for _ in 0..100 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("'{}' was never removed", path.display());
    }

    #[tokio::test]
    async fn test_begin_upload_stores_file() {
        let root = tempfile::tempdir().unwrap();
        let uploads = manager(root.path());

        let guard = uploads
            .begin_upload(b"pixels", "cat.jpg", "resnet18")
            .await
            .unwrap();
        let session = guard.session().clone();
        assert_eq!(session.dir(), root.path().join(session.id().to_string()));
        assert_eq!(std::fs::read(session.image_path()).unwrap(), b"pixels");
        assert!(session.validate().is_ok());

        let first = guard.schedule_cleanup();
        let second = guard.schedule_cleanup();
        assert_eq!(first.wait().await.unwrap(), CleanupOutcome::Removed);
        // Same deletion, not a second one finding the directory gone.
        assert_eq!(second.wait().await.unwrap(), CleanupOutcome::Removed);
        assert_eq!(guard.finish().wait().await.unwrap(), CleanupOutcome::Removed);
        assert!(!session.dir().exists());
    }

    #[tokio::test]
    async fn test_sweep_spares_sessions_in_use() {
        let root = tempfile::tempdir().unwrap();
        let uploads = manager(root.path());

        let guard = uploads
            .begin_upload(b"pixels", "cat.jpg", "resnet18")
            .await
            .unwrap();
        let session = guard.session().clone();
        assert!(uploads.scheduler().live_sessions().contains(session.id()));

        // The grace period is zero, so only the live mark protects the directory.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(uploads.sweep().await.unwrap(), 0);
        assert_eq!(std::fs::read(session.image_path()).unwrap(), b"pixels");

        guard.finish().wait().await.unwrap();
        assert!(!session.dir().exists());
        assert!(uploads.scheduler().live_sessions().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let uploads = manager(root.path());

        let mut set = tokio::task::JoinSet::new();
        for i in 0..16 {
            let uploads = uploads.clone();
            set.spawn(async move {
                let guard = uploads
                    .begin_upload(format!("image {i}").as_bytes(), "same.jpg", "alexnet")
                    .await
                    .unwrap();
                let session = guard.session().clone();
                let content = tokio::fs::read(session.image_path()).await.unwrap();
                assert_eq!(content, format!("image {i}").into_bytes());
                guard.finish();
                session.dir().to_path_buf()
            });
        }

        let mut dirs = HashSet::new();
        while let Some(dir) = set.join_next().await {
            dirs.insert(dir.unwrap());
        }
        assert_eq!(dirs.len(), 16);
        for dir in &dirs {
            wait_until_gone(dir).await;
        }
    }

    #[tokio::test]
    async fn test_validation_reports_every_violation() {
        let root = tempfile::tempdir().unwrap();
        let uploads = manager(root.path());

        let guard = uploads.begin_upload(b"", "", "").await.unwrap();
        match guard.session().validate() {
            Err(ClassifyError::Validation { violations }) => assert_eq!(
                violations,
                vec![
                    "A valid image id is required".to_string(),
                    "A valid model id is required".to_string(),
                ]
            ),
            other => panic!("expected validation error, got {other:?}"),
        }

        let guard = uploads.begin_upload(b"x", "cat.jpg", "").await.unwrap();
        let dir = guard.session().dir().to_path_buf();
        assert!(matches!(
            guard.session().validate(),
            Err(ClassifyError::Validation { violations }) if violations.len() == 1
        ));
        // Abandoned guards still clean up.
        drop(guard);
        wait_until_gone(&dir).await;
    }

    #[tokio::test]
    async fn test_traversal_filename_creates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let uploads = manager(root.path());

        for name in ["../escape.jpg", "..", "/etc/passwd", "a/b.jpg"] {
            assert!(matches!(
                uploads.begin_upload(b"x", name, "resnet18").await,
                Err(ClassifyError::InvalidImageId { .. })
            ));
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(!root.path().parent().unwrap().join("escape.jpg").exists());
    }

    #[tokio::test]
    async fn test_uncreatable_root_is_storage_error() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let uploads = manager(&blocker);

        assert!(matches!(
            uploads.begin_upload(b"x", "cat.jpg", "resnet18").await,
            Err(ClassifyError::Storage {
                operation: "create",
                ..
            })
        ));
        assert!(uploads.scheduler().live_sessions().is_empty());
    }
}
