//! Image caching and save-disk-as-image workflows.
//!
//! Both run in the background and serialise on the `cachedimages` lock for
//! their `(storage cache, image)` pair. Registry writes happen before the
//! guard drops so the next holder sees them.

use serde_json::json;
use tracing::{info, warn};

use super::DriverContext;
use crate::error::DriverError;
use crate::lock::CACHED_IMAGES_NAMESPACE;
use crate::models::{Disk, Host, Storage, StorageCache};
use crate::registry::{CachedImageKey, CachedImageStatus};
use crate::remote::{RemoteDisk, RemoteImage, RemoteSnapshot, UploadImageRequest};
use crate::task::{ResultDocument, Task, TaskOutcome};

const CACHE_IMAGE_MESSAGE: &str = "check_and_set_cache_image";
const SAVE_IMAGE_MESSAGE: &str = "request_prepare_save_disk_on_host";
const SAVE_SNAPSHOT_DESCRIPTION: &str = "PrepareSaveImage";

fn upload_request(task: &Task) -> Result<UploadImageRequest, DriverError> {
    let image_id = task
        .param_str("image_id")
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| DriverError::validation("missing parameter image_id"))?;
    let optional = |key: &str| task.param_str(key).map(str::to_owned);
    Ok(UploadImageRequest {
        image_id: image_id.to_owned(),
        os_arch: optional("os_arch"),
        os_type: optional("os_type"),
        os_distribution: optional("os_distribution"),
        os_version: optional("os_version"),
        existing_external_id: None,
        force: task.param_bool("is_force", false),
    })
}

pub(super) async fn check_and_set_cache_image(
    ctx: &DriverContext,
    host: &Host,
    storage_cache: &StorageCache,
    task: Task,
) -> Result<(), DriverError> {
    let request = upload_request(&task)?;
    let key = CachedImageKey::new(&storage_cache.id, &request.image_id);
    info!(
        task_id = %task.id(),
        host_id = %host.id,
        storage_cache_id = %key.storage_cache_id,
        image_id = %key.image_id,
        force = request.force,
        "caching image"
    );
    let work = cache_image(ctx.clone(), storage_cache.clone(), key, request);
    ctx.runner.local_run(task, work).await?;
    Ok(())
}

async fn cache_image(
    ctx: DriverContext,
    storage_cache: StorageCache,
    key: CachedImageKey,
    mut request: UploadImageRequest,
) -> TaskOutcome {
    let _guard = ctx
        .locks
        .acquire(CACHED_IMAGES_NAMESPACE, &key.lock_key())
        .await;
    let row = ctx.images.register(&key)?;
    if !row.is_ready() || request.force {
        ctx.images
            .set_status(&key, CachedImageStatus::Caching, CACHE_IMAGE_MESSAGE)?;
    }
    request.existing_external_id = row.external_id;

    let external_id = match storage_cache.backend.upload_image(&request).await {
        Ok(external_id) => external_id,
        Err(err) => {
            ctx.mark_cache_failed(&key, &err.to_string());
            return Err(err.into());
        }
    };
    if let Err(err) = mark_ready(&ctx, &key, &external_id) {
        ctx.mark_cache_failed(&key, &err.to_string());
        return Err(err);
    }

    let mut document = ResultDocument::new();
    document.insert(String::from("image_id"), json!(external_id));
    Ok(document)
}

fn mark_ready(
    ctx: &DriverContext,
    key: &CachedImageKey,
    external_id: &str,
) -> Result<(), DriverError> {
    ctx.images.set_external_id(key, external_id)?;
    ctx.images.set_status(key, CachedImageStatus::Ready, "")?;
    Ok(())
}

pub(super) fn prepare_save_disk(
    ctx: &DriverContext,
    host: &Host,
    disk: &Disk,
    image_id: &str,
    task: &Task,
) -> Result<(), DriverError> {
    info!(
        task_id = %task.id(),
        host_id = %host.id,
        disk_id = %disk.id,
        image_id,
        "disk ready to be saved"
    );
    ctx.runner.schedule_run(task, None)?;
    Ok(())
}

pub(super) async fn save_upload_image(
    ctx: &DriverContext,
    host: &Host,
    storage: &Storage,
    disk: &Disk,
    image_id: &str,
    task: Task,
) -> Result<(), DriverError> {
    let external_id = disk
        .external_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DriverError::not_found("disk", &disk.id))?;
    let storage_cache = storage
        .cache
        .clone()
        .ok_or_else(|| DriverError::not_found("storage cache for storage", &storage.name))?;
    let os_type = task
        .nested_str(&["properties", "os_type"])
        .unwrap_or_default()
        .to_owned();
    info!(
        task_id = %task.id(),
        host_id = %host.id,
        disk_id = %disk.id,
        storage_cache_id = %storage_cache.id,
        image_id,
        "saving disk as image"
    );

    let job = SaveImageJob {
        ctx: ctx.clone(),
        storage: storage.clone(),
        storage_cache,
        disk_external_id: external_id,
        image_id: image_id.to_owned(),
        os_type,
    };
    ctx.runner.local_run(task, job.run()).await?;
    Ok(())
}

struct SaveImageJob {
    ctx: DriverContext,
    storage: Storage,
    storage_cache: StorageCache,
    disk_external_id: String,
    image_id: String,
    os_type: String,
}

impl SaveImageJob {
    async fn run(self) -> TaskOutcome {
        let remote_disk = self
            .storage
            .backend
            .get_disk(&self.disk_external_id)
            .await?;
        let snapshot = self.snapshot(remote_disk.as_ref()).await?;
        let key = CachedImageKey::new(&self.storage_cache.id, &self.image_id);

        let _guard = self
            .ctx
            .locks
            .acquire(CACHED_IMAGES_NAMESPACE, &key.lock_key())
            .await;
        match self.export(&key, snapshot.as_ref()).await {
            Ok((image, document)) => {
                self.cleanup_image(image.as_ref()).await;
                self.cleanup_snapshot(snapshot.as_ref()).await;
                self.mark_ready(&key)?;
                Ok(document)
            }
            Err(err) => {
                self.cleanup_snapshot(snapshot.as_ref()).await;
                Err(err)
            }
        }
    }

    async fn snapshot(
        &self,
        disk: &dyn RemoteDisk,
    ) -> Result<Box<dyn RemoteSnapshot>, DriverError> {
        let name = format!("Snapshot-{}", self.image_id);
        let snapshot = disk
            .create_snapshot(&name, SAVE_SNAPSHOT_DESCRIPTION)
            .await?;
        Ok(snapshot)
    }

    async fn export(
        &self,
        key: &CachedImageKey,
        snapshot: &dyn RemoteSnapshot,
    ) -> Result<(Box<dyn RemoteImage>, ResultDocument), DriverError> {
        let row = self.ctx.images.register(key)?;
        if !row.is_ready() {
            self.ctx
                .images
                .set_status(key, CachedImageStatus::Caching, SAVE_IMAGE_MESSAGE)?;
        }

        let image_name = format!("Image-{}", self.image_id);
        let image = match self
            .storage_cache
            .backend
            .create_image(snapshot.id(), &image_name, &self.os_type, "")
            .await
        {
            Ok(image) => image,
            Err(err) => {
                self.ctx.mark_cache_failed(key, &err.to_string());
                return Err(err.into());
            }
        };
        if let Err(err) = self.ctx.images.set_external_id(key, image.id()) {
            self.ctx.mark_cache_failed(key, &err.to_string());
            return Err(err.into());
        }

        match self.download(image.as_ref()).await {
            Ok(document) => Ok((image, document)),
            Err(err) => {
                self.ctx.mark_cache_failed(key, &err.to_string());
                Err(err)
            }
        }
    }

    fn mark_ready(&self, key: &CachedImageKey) -> Result<(), DriverError> {
        self.ctx
            .images
            .set_status(key, CachedImageStatus::Ready, "")
            .map_err(|err| {
                self.ctx.mark_cache_failed(key, &err.to_string());
                DriverError::from(err)
            })
    }

    async fn download(&self, image: &dyn RemoteImage) -> TaskOutcome {
        let dest = self.ctx.staging.prepare(&self.image_id)?;
        let document = self
            .storage_cache
            .backend
            .download_image(&self.image_id, image.id(), &dest)
            .await?;
        Ok(document)
    }

    async fn cleanup_image(&self, image: &dyn RemoteImage) {
        if let Err(err) = image.delete().await {
            warn!(
                image_id = %self.image_id,
                remote_image_id = %image.id(),
                error = %err,
                "failed to delete transient image"
            );
        }
    }

    async fn cleanup_snapshot(&self, snapshot: &dyn RemoteSnapshot) {
        if let Err(err) = snapshot.delete().await {
            warn!(
                image_id = %self.image_id,
                snapshot_id = %snapshot.id(),
                error = %err,
                "failed to delete transient snapshot"
            );
        }
    }
}
