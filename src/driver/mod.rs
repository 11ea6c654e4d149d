//! Host drivers.
//!
//! A [`HostDriver`] turns each lifecycle request into a unit of work that
//! completes a [`Task`]. The default methods carry the shared behaviour;
//! provider variants supply their host type and size table and override
//! only where the provider differs.
//!
//! Every method follows the same error rule: a returned `Err` means the
//! request was rejected up front and the task was left untouched. Failures
//! after that point complete the task instead.

mod aws;
mod context;
mod disk;
mod image;
mod registry;
mod scaleway;
pub mod size;

use std::future::Future;
use std::pin::Pin;

pub use aws::{AwsHostDriver, HOST_TYPE_AWS};
pub use context::DriverContext;
pub use registry::{DriverRegistry, DriverRegistryBuilder};
pub use scaleway::{HOST_TYPE_SCALEWAY, ScalewayHostDriver};
pub use size::{DiskSizeRange, DiskSizeTable, gb_to_mb, mb_to_gb};

use crate::error::DriverError;
use crate::models::{Disk, Host, Storage, StorageCache};
use crate::task::Task;

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send + 'a>>;

/// Lifecycle operations implemented by every provider.
pub trait HostDriver: Send + Sync {
    /// Host type served by the driver (for example `aws`).
    fn host_type(&self) -> &'static str;

    /// Collaborators shared by the driver operations.
    fn context(&self) -> &DriverContext;

    /// Accepted disk sizes per storage class.
    fn disk_size_table(&self) -> &DiskSizeTable;

    /// Checks a disk size in GiB against the driver's table.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] for unknown storage classes or
    /// out-of-range sizes.
    fn validate_disk_size(&self, storage_type: &str, size_gb: u64) -> Result<(), DriverError> {
        self.disk_size_table().validate(storage_type, size_gb)
    }

    /// Makes the image named by the task's `image_id` parameter available in
    /// `storage_cache`, recording the result in the cached-image registry.
    ///
    /// Optional parameters: `os_arch`, `os_type`, `os_distribution`,
    /// `os_version` and `is_force`. The task completes with `{image_id}` set
    /// to the remote image identifier.
    fn check_and_set_cache_image<'a>(
        &'a self,
        host: &'a Host,
        storage_cache: &'a StorageCache,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        Box::pin(image::check_and_set_cache_image(
            self.context(),
            host,
            storage_cache,
            task,
        ))
    }

    /// Readies a disk for saving; completes the task at once.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Task`] when the task was already completed.
    fn request_prepare_save_disk_on_host(
        &self,
        host: &Host,
        disk: &Disk,
        image_id: &str,
        task: Task,
    ) -> Result<(), DriverError> {
        image::prepare_save_disk(self.context(), host, disk, image_id, &task)
    }

    /// Snapshots `disk`, turns the snapshot into an image in the storage's
    /// cache, and exports the image into the staging area.
    ///
    /// The task completes with the export document. Returns `Err` without
    /// touching the task when the disk was never allocated or the storage
    /// has no cache.
    fn request_save_upload_image_on_host<'a>(
        &'a self,
        host: &'a Host,
        storage: &'a Storage,
        disk: &'a Disk,
        image_id: &'a str,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        Box::pin(image::save_upload_image(
            self.context(),
            host,
            storage,
            disk,
            image_id,
            task,
        ))
    }

    /// Creates the remote volume for `disk` with `size_mb` MiB, rounded up
    /// to whole GiB.
    ///
    /// The task completes with `disk_size` (MiB) and `disk_format`.
    fn request_allocate_disk_on_storage<'a>(
        &'a self,
        host: &'a Host,
        storage: &'a Storage,
        disk: &'a Disk,
        size_mb: u64,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.validate_disk_size(&storage.storage_type, mb_to_gb(size_mb))?;
            disk::allocate(self.context(), host, storage, disk, size_mb, task).await
        })
    }

    /// Deletes the remote volume of `disk`. A volume that is already gone
    /// counts as deleted.
    fn request_deallocate_disk_on_host<'a>(
        &'a self,
        host: &'a Host,
        storage: &'a Storage,
        disk: &'a Disk,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        Box::pin(disk::deallocate(self.context(), host, storage, disk, task))
    }

    /// Grows the remote volume of `disk` to `size_mb` MiB.
    ///
    /// The task completes with the new `disk_size` (MiB).
    fn request_resize_disk_on_host<'a>(
        &'a self,
        host: &'a Host,
        storage: &'a Storage,
        disk: &'a Disk,
        size_mb: u64,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        Box::pin(async move {
            self.validate_disk_size(&storage.storage_type, mb_to_gb(size_mb))?;
            disk::resize(self.context(), host, storage, disk, size_mb, task).await
        })
    }

    /// Resizes a disk attached to a running guest. Shares the offline path
    /// unless the provider needs otherwise.
    fn request_resize_disk_on_host_online<'a>(
        &'a self,
        host: &'a Host,
        storage: &'a Storage,
        disk: &'a Disk,
        size_mb: u64,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        self.request_resize_disk_on_host(host, storage, disk, size_mb, task)
    }
}
