//! Host driver core for multi-cloud disk and image orchestration.
//!
//! The crate turns disk and image lifecycle requests against cloud hosts
//! into background tasks. [`driver::HostDriver`] implementations share one
//! flow (lock, call the provider through the [`remote`] facade, update the
//! local records, complete the task) and differ only in their size tables
//! and provider quirks. [`scaleway`] implements the facade against the
//! Scaleway Instance API.

pub mod config;
pub mod driver;
pub mod error;
pub mod lock;
pub mod models;
pub mod registry;
pub mod remote;
pub mod scaleway;
pub mod staging;
pub mod store;
pub mod task;
pub mod test_support;

pub use config::{ConfigError, DEFAULT_STAGING_PATH, DriverConfig, ScalewayConfig};
pub use driver::{
    AwsHostDriver, DriverContext, DriverRegistry, HOST_TYPE_AWS, HOST_TYPE_SCALEWAY, HostDriver,
    ScalewayHostDriver,
};
pub use error::DriverError;
pub use lock::{LockGuard, LockManager};
pub use models::{Disk, Host, Storage, StorageCache};
pub use registry::{
    CachedImage, CachedImageKey, CachedImageRegistry, CachedImageStatus,
    InMemoryCachedImageRegistry,
};
pub use remote::RemoteError;
pub use scaleway::{ScalewayBackendError, ScalewayClient};
pub use staging::StagingArea;
pub use store::{DiskStore, InMemoryDiskStore};
pub use task::{Principal, ResultDocument, Task, TaskError, TaskReceipt, TaskRunner};
