//! Disk allocate, deallocate and resize.
//!
//! Each operation holds the `disks` lock for the disk while it talks to the
//! provider, then completes the task. Under the lock the disk record is
//! re-read from the store, so an operation queued behind another sees the
//! external id its predecessor wrote. Validation happens in the caller
//! before the lock is taken.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::{info, warn};

use super::DriverContext;
use super::size::mb_to_gb;
use crate::error::DriverError;
use crate::lock::DISKS_NAMESPACE;
use crate::models::{Disk, Host, Storage};
use crate::remote::{DiskDescriptor, RemoteDisk};
use crate::store::DiskStore;
use crate::task::{ResultDocument, Task, TaskOutcome};

pub(super) async fn allocate(
    ctx: &DriverContext,
    host: &Host,
    storage: &Storage,
    disk: &Disk,
    size_mb: u64,
    task: Task,
) -> Result<(), DriverError> {
    let _guard = ctx.locks.acquire(DISKS_NAMESPACE, &disk.id).await;
    info!(
        task_id = %task.id(),
        host_id = %host.id,
        disk_id = %disk.id,
        size_mb,
        "allocating disk"
    );
    let outcome = create_remote_disk(ctx, storage, disk, mb_to_gb(size_mb)).await;
    ctx.complete(&task, outcome)
}

async fn create_remote_disk(
    ctx: &DriverContext,
    storage: &Storage,
    disk: &Disk,
    size_gb: u64,
) -> TaskOutcome {
    let stored = ctx.disks.get(&disk.id)?;
    let descriptor = DiskDescriptor {
        storage_type: storage.storage_type.clone(),
        tags: BTreeMap::new(),
    };
    let remote = storage
        .backend
        .create_disk(&stored.name, size_gb, &descriptor)
        .await?;
    if let Err(err) = ctx.disks.set_external_id(&stored.id, Some(remote.global_id())) {
        discard_remote_disk(&stored, remote.as_ref()).await;
        return Err(err.into());
    }
    copy_metadata(ctx.disks.as_ref(), &stored, remote.metadata());
    ctx.disks.set_size(&stored.id, remote.size_mb())?;

    let mut document = ResultDocument::new();
    document.insert(String::from("disk_size"), json!(remote.size_mb()));
    document.insert(String::from("disk_format"), json!(remote.format()));
    Ok(document)
}

async fn discard_remote_disk(disk: &Disk, remote: &dyn RemoteDisk) {
    if let Err(err) = remote.delete().await {
        warn!(
            disk_id = %disk.id,
            external_id = %remote.global_id(),
            error = %err,
            "failed to delete unrecorded volume"
        );
    }
}

fn copy_metadata(store: &dyn DiskStore, disk: &Disk, metadata: BTreeMap<String, String>) {
    for (key, value) in metadata {
        if let Err(err) = store.set_metadata(&disk.id, &key, &value) {
            warn!(
                disk_id = %disk.id,
                key = %key,
                error = %err,
                "skipping disk metadata entry"
            );
        }
    }
}

pub(super) async fn deallocate(
    ctx: &DriverContext,
    host: &Host,
    storage: &Storage,
    disk: &Disk,
    task: Task,
) -> Result<(), DriverError> {
    let _guard = ctx.locks.acquire(DISKS_NAMESPACE, &disk.id).await;
    info!(task_id = %task.id(), host_id = %host.id, disk_id = %disk.id, "deallocating disk");
    let outcome = release_remote_disk(ctx, storage, disk).await;
    ctx.complete(&task, outcome)
}

async fn release_remote_disk(ctx: &DriverContext, storage: &Storage, disk: &Disk) -> TaskOutcome {
    let stored = ctx.disks.get(&disk.id)?;
    let Some(external_id) = stored.external_id.as_deref().filter(|id| !id.is_empty()) else {
        info!(disk_id = %disk.id, "disk was never allocated; nothing to delete");
        return Ok(ResultDocument::new());
    };
    match storage.backend.get_disk(external_id).await {
        Ok(remote) => remote.delete().await?,
        Err(err) if err.is_not_found() => {
            info!(disk_id = %disk.id, external_id, "remote disk already gone");
        }
        Err(err) => return Err(err.into()),
    }
    ctx.disks.set_external_id(&disk.id, None)?;
    Ok(ResultDocument::new())
}

pub(super) async fn resize(
    ctx: &DriverContext,
    host: &Host,
    storage: &Storage,
    disk: &Disk,
    size_mb: u64,
    task: Task,
) -> Result<(), DriverError> {
    let _guard = ctx.locks.acquire(DISKS_NAMESPACE, &disk.id).await;
    info!(
        task_id = %task.id(),
        host_id = %host.id,
        disk_id = %disk.id,
        size_mb,
        "resizing disk"
    );
    let outcome = resize_remote_disk(ctx, storage, disk, size_mb).await;
    ctx.complete(&task, outcome)
}

async fn resize_remote_disk(
    ctx: &DriverContext,
    storage: &Storage,
    disk: &Disk,
    size_mb: u64,
) -> TaskOutcome {
    let stored = ctx.disks.get(&disk.id)?;
    let external_id = stored
        .external_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DriverError::not_found("disk", &disk.id))?;
    let remote = storage.backend.get_disk(external_id).await?;
    remote.resize(mb_to_gb(size_mb)).await?;
    ctx.disks.set_size(&disk.id, size_mb)?;

    let mut document = ResultDocument::new();
    document.insert(String::from("disk_size"), json!(size_mb));
    Ok(document)
}
