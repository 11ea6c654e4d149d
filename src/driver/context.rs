//! Shared collaborators handed to every driver.

use std::fmt;
use std::sync::Arc;

use tracing::{error, warn};

use crate::error::DriverError;
use crate::lock::LockManager;
use crate::registry::{
    CachedImageKey, CachedImageRegistry, CachedImageStatus, InMemoryCachedImageRegistry,
};
use crate::staging::StagingArea;
use crate::store::{DiskStore, InMemoryDiskStore};
use crate::task::{Task, TaskOutcome, TaskRunner};

/// Lock manager, task runner, record stores and staging area used by the
/// driver operations.
///
/// Cloning is cheap; every field shares its state.
#[derive(Clone)]
pub struct DriverContext {
    /// Advisory locks over cached images and disks.
    pub locks: LockManager,
    /// Runner completing tasks and executing background work.
    pub runner: TaskRunner,
    /// Cached-image rows.
    pub images: Arc<dyn CachedImageRegistry>,
    /// Disk records.
    pub disks: Arc<dyn DiskStore>,
    /// Local export directories.
    pub staging: StagingArea,
}

impl DriverContext {
    /// Builds a context from explicit collaborators.
    #[must_use]
    pub fn new(
        runner: TaskRunner,
        images: Arc<dyn CachedImageRegistry>,
        disks: Arc<dyn DiskStore>,
        staging: StagingArea,
    ) -> Self {
        Self {
            locks: LockManager::new(),
            runner,
            images,
            disks,
            staging,
        }
    }

    /// Builds a context backed by in-memory record stores.
    #[must_use]
    pub fn in_memory(runner: TaskRunner, staging: StagingArea) -> Self {
        Self::new(
            runner,
            Arc::new(InMemoryCachedImageRegistry::new()),
            Arc::new(InMemoryDiskStore::new()),
            staging,
        )
    }

    /// Delivers `outcome` to `task`.
    pub(crate) fn complete(&self, task: &Task, outcome: TaskOutcome) -> Result<(), DriverError> {
        match outcome {
            Ok(document) => self.runner.schedule_run(task, Some(document))?,
            Err(err) => {
                error!(task_id = %task.id(), error = %err, "driver operation failed");
                self.runner.fail(task, err)?;
            }
        }
        Ok(())
    }

    /// Moves a cached image to `cache_failed`, logging rather than
    /// propagating a registry failure.
    pub(crate) fn mark_cache_failed(&self, key: &CachedImageKey, message: &str) {
        if let Err(err) = self
            .images
            .set_status(key, CachedImageStatus::CacheFailed, message)
        {
            warn!(
                storage_cache_id = %key.storage_cache_id,
                image_id = %key.image_id,
                error = %err,
                "failed to record cache failure"
            );
        }
    }
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("locks", &self.locks)
            .field("runner", &self.runner)
            .field("staging", &self.staging)
            .finish_non_exhaustive()
    }
}
