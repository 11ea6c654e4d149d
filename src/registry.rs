//! Cached-image registry.
//!
//! Tracks one row per `(storage cache, source image)` pair together with the
//! remote image identifier and a caching status. Rows are created lazily by
//! [`CachedImageRegistry::register`] and never deleted here.
//!
//! Status flow: `init` → `caching` → `ready` | `cache_failed`, and
//! `cache_failed` may go back to `caching` on retry. Any state may move to
//! `cache_failed`. The registry itself only enforces that a `ready` row
//! carries a remote image identifier; callers serialise whole workflows per
//! key with the `cachedimages` lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::debug;

/// Caching status of a cached-image row.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CachedImageStatus {
    /// Row registered but no caching attempted yet.
    #[default]
    Init,
    /// A cache or save workflow is in progress.
    Caching,
    /// The remote image is available.
    Ready,
    /// The last caching attempt failed.
    CacheFailed,
}

impl CachedImageStatus {
    /// Stable string form used in logs and result documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Caching => "caching",
            Self::Ready => "ready",
            Self::CacheFailed => "cache_failed",
        }
    }
}

impl fmt::Display for CachedImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite key of a cached-image row.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CachedImageKey {
    /// Local storage cache identifier.
    pub storage_cache_id: String,
    /// Source image identifier.
    pub image_id: String,
}

impl CachedImageKey {
    /// Creates a key for the given storage cache and image.
    #[must_use]
    pub fn new(storage_cache_id: impl Into<String>, image_id: impl Into<String>) -> Self {
        Self {
            storage_cache_id: storage_cache_id.into(),
            image_id: image_id.into(),
        }
    }

    /// Key used with the `cachedimages` lock namespace.
    #[must_use]
    pub fn lock_key(&self) -> String {
        format!("{}-{}", self.storage_cache_id, self.image_id)
    }
}

/// One cached-image row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CachedImage {
    /// Composite key of the row.
    pub key: CachedImageKey,
    /// Remote image identifier, once known.
    pub external_id: Option<String>,
    /// Current caching status.
    pub status: CachedImageStatus,
    /// Message recorded with the last status change.
    pub status_message: String,
}

impl CachedImage {
    fn new(key: CachedImageKey) -> Self {
        Self {
            key,
            external_id: None,
            status: CachedImageStatus::Init,
            status_message: String::new(),
        }
    }

    /// Returns `true` when the row is ready for use.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == CachedImageStatus::Ready
    }
}

/// Errors raised by cached-image registries.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when a mutation targets a key that was never registered.
    #[error("cached image {storage_cache_id}/{image_id} is not registered")]
    NotRegistered {
        /// Storage cache component of the key.
        storage_cache_id: String,
        /// Image component of the key.
        image_id: String,
    },
    /// Raised when an empty remote identifier is recorded.
    #[error("external id for cached image {image_id} must not be empty")]
    EmptyExternalId {
        /// Image component of the key.
        image_id: String,
    },
    /// Raised when a row would become ready without a remote identifier.
    #[error("cached image {image_id} cannot be ready without an external id")]
    ReadyWithoutExternalId {
        /// Image component of the key.
        image_id: String,
    },
}

impl RegistryError {
    fn not_registered(key: &CachedImageKey) -> Self {
        Self::NotRegistered {
            storage_cache_id: key.storage_cache_id.clone(),
            image_id: key.image_id.clone(),
        }
    }
}

/// Storage of cached-image rows.
///
/// Every mutation must be visible to the next reader once it returns, so
/// the holder of the `cachedimages` lock that follows observes it.
pub trait CachedImageRegistry: Send + Sync {
    /// Returns the row for `key`, creating it in the `init` state if absent.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the backing store fails.
    fn register(&self, key: &CachedImageKey) -> Result<CachedImage, RegistryError>;

    /// Returns the row for `key` if it exists.
    fn get(&self, key: &CachedImageKey) -> Option<CachedImage>;

    /// Records the remote image identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown keys and
    /// [`RegistryError::EmptyExternalId`] for blank identifiers.
    fn set_external_id(&self, key: &CachedImageKey, external_id: &str)
    -> Result<(), RegistryError>;

    /// Moves the row to `status`, recording `message`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown keys and
    /// [`RegistryError::ReadyWithoutExternalId`] when `status` is ready but
    /// no remote identifier was recorded.
    fn set_status(
        &self,
        key: &CachedImageKey,
        status: CachedImageStatus,
        message: &str,
    ) -> Result<(), RegistryError>;
}

/// Process-local [`CachedImageRegistry`].
#[derive(Debug, Default)]
pub struct InMemoryCachedImageRegistry {
    rows: Mutex<HashMap<CachedImageKey, CachedImage>>,
}

impl InMemoryCachedImageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` when no row is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_row<T>(
        &self,
        key: &CachedImageKey,
        update: impl FnOnce(&mut CachedImage) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let row = rows
            .get_mut(key)
            .ok_or_else(|| RegistryError::not_registered(key))?;
        update(row)
    }
}

impl CachedImageRegistry for InMemoryCachedImageRegistry {
    fn register(&self, key: &CachedImageKey) -> Result<CachedImage, RegistryError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let row = rows
            .entry(key.clone())
            .or_insert_with(|| CachedImage::new(key.clone()));
        Ok(row.clone())
    }

    fn get(&self, key: &CachedImageKey) -> Option<CachedImage> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_external_id(
        &self,
        key: &CachedImageKey,
        external_id: &str,
    ) -> Result<(), RegistryError> {
        if external_id.trim().is_empty() {
            return Err(RegistryError::EmptyExternalId {
                image_id: key.image_id.clone(),
            });
        }
        self.with_row(key, |row| {
            row.external_id = Some(external_id.to_owned());
            Ok(())
        })
    }

    fn set_status(
        &self,
        key: &CachedImageKey,
        status: CachedImageStatus,
        message: &str,
    ) -> Result<(), RegistryError> {
        self.with_row(key, |row| {
            if status == CachedImageStatus::Ready
                && row.external_id.as_deref().is_none_or(str::is_empty)
            {
                return Err(RegistryError::ReadyWithoutExternalId {
                    image_id: key.image_id.clone(),
                });
            }
            debug!(
                storage_cache_id = %key.storage_cache_id,
                image_id = %key.image_id,
                from = %row.status,
                to = %status,
                "cached image status change"
            );
            row.status = status;
            message.clone_into(&mut row.status_message);
            Ok(())
        })
    }
}
