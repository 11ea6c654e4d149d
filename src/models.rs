//! Local records the drivers read and update.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::remote::{RemoteStorage, RemoteStorageCache};

/// A compute host managed by one driver.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Host {
    /// Local identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Host type used to pick the driver (for example `aws`).
    pub host_type: String,
}

/// Local record of one disk.
///
/// `external_id` is set exactly while the remote volume exists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Disk {
    /// Local identifier.
    pub id: String,
    /// Owning storage identifier.
    pub storage_id: String,
    /// Disk name, reused as the remote volume name.
    pub name: String,
    /// Provider identifier of the remote volume.
    pub external_id: Option<String>,
    /// Size in MiB.
    pub size_mb: u64,
    /// Disk image format.
    pub format: String,
    /// Backend metadata copied after allocation.
    pub metadata: BTreeMap<String, String>,
}

impl Disk {
    /// Creates an unallocated disk record.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        storage_id: impl Into<String>,
        name: impl Into<String>,
        size_mb: u64,
    ) -> Self {
        Self {
            id: id.into(),
            storage_id: storage_id.into(),
            name: name.into(),
            size_mb,
            ..Self::default()
        }
    }
}

/// Image cache attached to a storage.
#[derive(Clone)]
pub struct StorageCache {
    /// Local identifier, used in cached-image keys.
    pub id: String,
    /// Owning storage identifier.
    pub storage_id: String,
    /// Facade used to reach the provider.
    pub backend: Arc<dyn RemoteStorageCache>,
}

impl fmt::Debug for StorageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCache")
            .field("id", &self.id)
            .field("storage_id", &self.storage_id)
            .field("backend", &self.backend.id())
            .finish()
    }
}

/// Block storage a disk lives on.
#[derive(Clone)]
pub struct Storage {
    /// Local identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Storage class checked against the driver's size table.
    pub storage_type: String,
    /// Image cache, when the storage has one.
    pub cache: Option<StorageCache>,
    /// Facade used to reach the provider.
    pub backend: Arc<dyn RemoteStorage>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("storage_type", &self.storage_type)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
