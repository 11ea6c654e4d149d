//! Capability traits describing what a cloud backend must offer.
//!
//! Drivers only talk to providers through these traits: a storage can
//! create and look up disks, a disk can be resized, snapshotted and deleted,
//! and a storage cache turns snapshots into images and moves images in and
//! out of the provider. Each provider ships one implementation (see
//! [`crate::scaleway`]); tests use the scripted doubles in
//! [`crate::test_support`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;
use thiserror::Error;

use crate::task::ResultDocument;

/// Future returned by facade operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Errors raised by facade implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the provider reports the resource as absent.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind (`disk`, `snapshot`, `image`).
        kind: String,
        /// Provider identifier used for the lookup.
        id: String,
    },
    /// Raised when a provider call fails for any other reason.
    #[error("{operation} failed: {message}")]
    Operation {
        /// Facade operation that failed.
        operation: String,
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when the provider cannot perform the operation at all.
    #[error("{operation} is not supported by this backend")]
    Unsupported {
        /// Facade operation that was requested.
        operation: String,
    },
}

impl RemoteError {
    /// Builds a not-found error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Builds an operation failure.
    #[must_use]
    pub fn operation(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Returns `true` when the error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Backend-specific options passed when creating a disk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiskDescriptor {
    /// Storage class of the new disk (for example `gp2` or `b_ssd`).
    pub storage_type: String,
    /// Tags or labels to attach to the remote volume.
    pub tags: BTreeMap<String, String>,
}

/// Remote block storage able to host disks.
pub trait RemoteStorage: Send + Sync {
    /// Creates a disk of `size_gb` GiB.
    fn create_disk<'a>(
        &'a self,
        name: &'a str,
        size_gb: u64,
        descriptor: &'a DiskDescriptor,
    ) -> RemoteFuture<'a, Box<dyn RemoteDisk>>;

    /// Fetches a disk by its provider identifier.
    ///
    /// Implementations return [`RemoteError::NotFound`] when the disk is
    /// gone.
    fn get_disk<'a>(&'a self, external_id: &'a str) -> RemoteFuture<'a, Box<dyn RemoteDisk>>;
}

/// One remote disk.
pub trait RemoteDisk: Send + Sync {
    /// Provider identifier of the disk.
    fn global_id(&self) -> &str;

    /// Size of the disk in MiB as reported by the provider.
    fn size_mb(&self) -> u64;

    /// Disk image format (for example `raw` or `vmdk`).
    fn format(&self) -> &str;

    /// Provider-side metadata copied into the local disk record.
    fn metadata(&self) -> BTreeMap<String, String>;

    /// Deletes the disk.
    fn delete(&self) -> RemoteFuture<'_, ()>;

    /// Grows the disk to `size_gb` GiB.
    fn resize(&self, size_gb: u64) -> RemoteFuture<'_, ()>;

    /// Snapshots the disk.
    fn create_snapshot<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> RemoteFuture<'a, Box<dyn RemoteSnapshot>>;
}

/// One remote snapshot.
pub trait RemoteSnapshot: Send + Sync {
    /// Provider identifier of the snapshot.
    fn id(&self) -> &str;

    /// Deletes the snapshot.
    fn delete(&self) -> RemoteFuture<'_, ()>;
}

/// One remote image.
pub trait RemoteImage: Send + Sync {
    /// Provider identifier of the image.
    fn id(&self) -> &str;

    /// Deletes the image.
    fn delete(&self) -> RemoteFuture<'_, ()>;
}

/// Parameters of a cache-image upload.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadImageRequest {
    /// Local image identifier or label to make available remotely.
    pub image_id: String,
    /// CPU architecture of the image.
    pub os_arch: Option<String>,
    /// Operating system family.
    pub os_type: Option<String>,
    /// Operating system distribution.
    pub os_distribution: Option<String>,
    /// Operating system version.
    pub os_version: Option<String>,
    /// Remote image identifier recorded by a previous successful run.
    pub existing_external_id: Option<String>,
    /// Re-upload even when the image is already cached.
    pub force: bool,
}

/// Image cache attached to a storage.
pub trait RemoteStorageCache: Send + Sync {
    /// Provider identifier of the cache (bucket, region, and so on).
    fn id(&self) -> &str;

    /// Creates an image from a snapshot.
    fn create_image<'a>(
        &'a self,
        snapshot_id: &'a str,
        name: &'a str,
        os_type: &'a str,
        os_version: &'a str,
    ) -> RemoteFuture<'a, Box<dyn RemoteImage>>;

    /// Makes a local image available remotely and returns its provider
    /// identifier.
    fn upload_image<'a>(&'a self, request: &'a UploadImageRequest) -> RemoteFuture<'a, String>;

    /// Exports a remote image into `dest` and returns the result document
    /// (`image_id`, `disk_size`, `disk_format` and any provider extras).
    fn download_image<'a>(
        &'a self,
        image_id: &'a str,
        external_id: &'a str,
        dest: &'a Utf8Path,
    ) -> RemoteFuture<'a, ResultDocument>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_names_the_call() {
        let err = RemoteError::operation("resize", "volume busy");
        assert_eq!(err.to_string(), "resize failed: volume busy");
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected() {
        assert!(RemoteError::not_found("snapshot", "snap-1").is_not_found());
    }
}
