//! Disk record store.
//!
//! Drivers never own disk records; they update them in place through a
//! [`DiskStore`] so concurrent readers see each field as soon as it is set.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::models::Disk;

/// Longest metadata key accepted by the in-memory store.
pub const MAX_METADATA_KEY_LEN: usize = 255;

/// Errors raised by disk stores.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StoreError {
    /// Raised when the disk record does not exist.
    #[error("disk record {disk_id} not found")]
    NotFound {
        /// Local disk identifier.
        disk_id: String,
    },
    /// Raised when a metadata key cannot be stored.
    #[error("invalid metadata key '{key}'")]
    InvalidMetadataKey {
        /// Rejected key.
        key: String,
    },
}

/// In-place updates of disk records.
pub trait DiskStore: Send + Sync {
    /// Returns a copy of the disk record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown disks.
    fn get(&self, disk_id: &str) -> Result<Disk, StoreError>;

    /// Sets or clears the remote identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown disks.
    fn set_external_id(&self, disk_id: &str, external_id: Option<&str>)
    -> Result<(), StoreError>;

    /// Records the disk size in MiB.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown disks.
    fn set_size(&self, disk_id: &str, size_mb: u64) -> Result<(), StoreError>;

    /// Stores one metadata entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown disks and
    /// [`StoreError::InvalidMetadataKey`] for keys the store cannot hold.
    fn set_metadata(&self, disk_id: &str, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Process-local [`DiskStore`].
#[derive(Debug, Default)]
pub struct InMemoryDiskStore {
    disks: Mutex<HashMap<String, Disk>>,
}

impl InMemoryDiskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a disk record.
    pub fn insert(&self, disk: Disk) {
        self.disks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(disk.id.clone(), disk);
    }

    fn update(&self, disk_id: &str, apply: impl FnOnce(&mut Disk)) -> Result<(), StoreError> {
        let mut disks = self.disks.lock().unwrap_or_else(PoisonError::into_inner);
        let disk = disks.get_mut(disk_id).ok_or_else(|| StoreError::NotFound {
            disk_id: disk_id.to_owned(),
        })?;
        apply(disk);
        Ok(())
    }
}

impl DiskStore for InMemoryDiskStore {
    fn get(&self, disk_id: &str) -> Result<Disk, StoreError> {
        self.disks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(disk_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                disk_id: disk_id.to_owned(),
            })
    }

    fn set_external_id(
        &self,
        disk_id: &str,
        external_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update(disk_id, |disk| {
            disk.external_id = external_id.map(str::to_owned);
        })
    }

    fn set_size(&self, disk_id: &str, size_mb: u64) -> Result<(), StoreError> {
        self.update(disk_id, |disk| disk.size_mb = size_mb)
    }

    fn set_metadata(&self, disk_id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        if key.is_empty() || key.len() > MAX_METADATA_KEY_LEN {
            return Err(StoreError::InvalidMetadataKey {
                key: key.to_owned(),
            });
        }
        self.update(disk_id, |disk| {
            disk.metadata.insert(key.to_owned(), value.to_owned());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_apply_in_place() {
        let store = InMemoryDiskStore::new();
        store.insert(Disk::new("disk-1", "st-1", "data", 2048));

        store
            .set_external_id("disk-1", Some("vol-1"))
            .expect("external id");
        store.set_size("disk-1", 4096).expect("size");
        store
            .set_metadata("disk-1", "zone", "fr-par-1")
            .expect("metadata");

        let disk = store.get("disk-1").expect("disk");
        assert_eq!(disk.external_id.as_deref(), Some("vol-1"));
        assert_eq!(disk.size_mb, 4096);
        assert_eq!(disk.metadata.get("zone").map(String::as_str), Some("fr-par-1"));

        store.set_external_id("disk-1", None).expect("clear");
        assert_eq!(store.get("disk-1").expect("disk").external_id, None);
    }

    #[test]
    fn rejects_unusable_metadata_keys() {
        let store = InMemoryDiskStore::new();
        store.insert(Disk::new("disk-1", "st-1", "data", 1));
        let long_key = "k".repeat(MAX_METADATA_KEY_LEN + 1);

        assert!(matches!(
            store.set_metadata("disk-1", "", "v"),
            Err(StoreError::InvalidMetadataKey { .. })
        ));
        assert!(matches!(
            store.set_metadata("disk-1", &long_key, "v"),
            Err(StoreError::InvalidMetadataKey { .. })
        ));
    }

    #[test]
    fn unknown_disks_are_reported() {
        let store = InMemoryDiskStore::new();
        assert_eq!(
            store.get("missing"),
            Err(StoreError::NotFound {
                disk_id: String::from("missing")
            })
        );
    }
}
