//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] is a scripted, in-memory provider implementing every
//! facade trait. Tests seed volumes, queue failures per operation, and
//! inspect the recorded calls afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use serde_json::json;

use crate::models::{Host, Storage, StorageCache};
use crate::remote::{
    DiskDescriptor, RemoteDisk, RemoteError, RemoteFuture, RemoteImage, RemoteSnapshot,
    RemoteStorage, RemoteStorageCache, UploadImageRequest,
};
use crate::task::ResultDocument;

/// Identifier of the storage returned by [`FakeCloud::storage`].
pub const FAKE_STORAGE_ID: &str = "storage-1";

/// Identifier of the storage cache returned by [`FakeCloud::storage`].
pub const FAKE_STORAGE_CACHE_ID: &str = "sc-1";

/// Facade operations a [`FakeCloud`] records and can be scripted to fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CloudOp {
    /// `RemoteStorage::create_disk`.
    CreateDisk,
    /// `RemoteStorage::get_disk`.
    GetDisk,
    /// `RemoteDisk::delete`.
    DeleteDisk,
    /// `RemoteDisk::resize`.
    ResizeDisk,
    /// `RemoteDisk::create_snapshot`.
    CreateSnapshot,
    /// `RemoteSnapshot::delete`.
    DeleteSnapshot,
    /// `RemoteStorageCache::create_image`.
    CreateImage,
    /// `RemoteImage::delete`.
    DeleteImage,
    /// `RemoteStorageCache::upload_image`.
    UploadImage,
    /// `RemoteStorageCache::download_image`.
    DownloadImage,
}

/// One call recorded by a [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudCall {
    /// Operation invoked.
    pub op: CloudOp,
    /// Name or identifier the call targeted.
    pub target: String,
    /// Size argument in GiB, for disk creation and resize.
    pub size_gb: Option<u64>,
}

#[derive(Clone, Debug)]
struct FakeVolume {
    size_gb: u64,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct CloudState {
    volumes: HashMap<String, FakeVolume>,
    snapshots: BTreeSet<String>,
    images: BTreeSet<String>,
    failures: HashMap<CloudOp, VecDeque<RemoteError>>,
    calls: Vec<CloudCall>,
    volume_metadata: BTreeMap<String, String>,
    upload_delay: Option<Duration>,
    next_id: u64,
}

/// Scripted in-memory cloud shared by every handle it returns.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<CloudState>>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds a storage of class `storage_type` whose disks and cache live in
    /// this cloud.
    #[must_use]
    pub fn storage(&self, storage_type: &str) -> Storage {
        let mut storage = self.storage_without_cache(storage_type);
        storage.cache = Some(StorageCache {
            id: FAKE_STORAGE_CACHE_ID.to_owned(),
            storage_id: FAKE_STORAGE_ID.to_owned(),
            backend: Arc::new(self.clone()),
        });
        storage
    }

    /// Builds a storage without an image cache.
    #[must_use]
    pub fn storage_without_cache(&self, storage_type: &str) -> Storage {
        Storage {
            id: FAKE_STORAGE_ID.to_owned(),
            name: String::from("fake-storage"),
            storage_type: storage_type.to_owned(),
            cache: None,
            backend: Arc::new(self.clone()),
        }
    }

    /// Seeds an existing volume and returns its identifier.
    #[must_use]
    pub fn insert_volume(&self, size_gb: u64) -> String {
        let mut state = self.state();
        let id = next_id(&mut state, "vol");
        state.volumes.insert(
            id.clone(),
            FakeVolume {
                size_gb,
                metadata: BTreeMap::new(),
            },
        );
        id
    }

    /// Metadata attached to every volume created from now on.
    pub fn set_volume_metadata(&self, metadata: BTreeMap<String, String>) {
        self.state().volume_metadata = metadata;
    }

    /// Makes the next call of `op` fail with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: CloudOp, error: RemoteError) {
        self.state().failures.entry(op).or_default().push_back(error);
    }

    /// Delays every image upload, widening race windows in tests.
    pub fn set_upload_delay(&self, delay: Duration) {
        self.state().upload_delay = Some(delay);
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        self.state().calls.clone()
    }

    /// Calls of a single operation.
    #[must_use]
    pub fn calls_of(&self, op: CloudOp) -> Vec<CloudCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    /// Size in GiB of a live volume.
    #[must_use]
    pub fn volume_size_gb(&self, id: &str) -> Option<u64> {
        self.state().volumes.get(id).map(|volume| volume.size_gb)
    }

    /// Returns `true` while the volume exists.
    #[must_use]
    pub fn has_volume(&self, id: &str) -> bool {
        self.state().volumes.contains_key(id)
    }

    /// Snapshots that have not been deleted.
    #[must_use]
    pub fn live_snapshots(&self) -> Vec<String> {
        self.state().snapshots.iter().cloned().collect()
    }

    /// Images that have not been deleted.
    #[must_use]
    pub fn live_images(&self) -> Vec<String> {
        self.state().images.iter().cloned().collect()
    }

    fn record(&self, op: CloudOp, target: &str, size_gb: Option<u64>) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.calls.push(CloudCall {
            op,
            target: target.to_owned(),
            size_gb,
        });
        state
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
            .map_or(Ok(()), Err)
    }

    fn disk_handle(&self, id: &str) -> Result<Box<dyn RemoteDisk>, RemoteError> {
        let state = self.state();
        let volume = state
            .volumes
            .get(id)
            .ok_or_else(|| RemoteError::not_found("disk", id))?;
        Ok(Box::new(FakeDisk {
            cloud: self.clone(),
            id: id.to_owned(),
            size_gb: volume.size_gb,
            metadata: volume.metadata.clone(),
        }))
    }
}

fn next_id(state: &mut CloudState, prefix: &str) -> String {
    state.next_id += 1;
    format!("{prefix}-{}", state.next_id)
}

impl RemoteStorage for FakeCloud {
    fn create_disk<'a>(
        &'a self,
        name: &'a str,
        size_gb: u64,
        _descriptor: &'a DiskDescriptor,
    ) -> RemoteFuture<'a, Box<dyn RemoteDisk>> {
        Box::pin(async move {
            self.record(CloudOp::CreateDisk, name, Some(size_gb))?;
            let id = {
                let mut state = self.state();
                let id = next_id(&mut state, "vol");
                let metadata = state.volume_metadata.clone();
                state
                    .volumes
                    .insert(id.clone(), FakeVolume { size_gb, metadata });
                id
            };
            self.disk_handle(&id)
        })
    }

    fn get_disk<'a>(&'a self, external_id: &'a str) -> RemoteFuture<'a, Box<dyn RemoteDisk>> {
        Box::pin(async move {
            self.record(CloudOp::GetDisk, external_id, None)?;
            self.disk_handle(external_id)
        })
    }
}

impl RemoteStorageCache for FakeCloud {
    fn id(&self) -> &str {
        "fake-cache"
    }

    fn create_image<'a>(
        &'a self,
        snapshot_id: &'a str,
        _name: &'a str,
        _os_type: &'a str,
        _os_version: &'a str,
    ) -> RemoteFuture<'a, Box<dyn RemoteImage>> {
        Box::pin(async move {
            self.record(CloudOp::CreateImage, snapshot_id, None)?;
            let mut state = self.state();
            let id = next_id(&mut state, "img");
            state.images.insert(id.clone());
            Ok(Box::new(FakeImage {
                cloud: self.clone(),
                id,
            }) as Box<dyn RemoteImage>)
        })
    }

    fn upload_image<'a>(&'a self, request: &'a UploadImageRequest) -> RemoteFuture<'a, String> {
        Box::pin(async move {
            let delay = self.state().upload_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.record(CloudOp::UploadImage, &request.image_id, None)?;
            match &request.existing_external_id {
                Some(existing) if !request.force => Ok(existing.clone()),
                _ => Ok(format!("ext-{}", request.image_id)),
            }
        })
    }

    fn download_image<'a>(
        &'a self,
        image_id: &'a str,
        external_id: &'a str,
        dest: &'a Utf8Path,
    ) -> RemoteFuture<'a, ResultDocument> {
        Box::pin(async move {
            self.record(CloudOp::DownloadImage, external_id, None)?;
            let mut document = ResultDocument::new();
            document.insert(String::from("image_id"), json!(image_id));
            document.insert(String::from("disk_size"), json!(1024));
            document.insert(String::from("disk_format"), json!("raw"));
            document.insert(String::from("path"), json!(dest.as_str()));
            Ok(document)
        })
    }
}

struct FakeDisk {
    cloud: FakeCloud,
    id: String,
    size_gb: u64,
    metadata: BTreeMap<String, String>,
}

impl RemoteDisk for FakeDisk {
    fn global_id(&self) -> &str {
        &self.id
    }

    fn size_mb(&self) -> u64 {
        self.size_gb.saturating_mul(1024)
    }

    fn format(&self) -> &str {
        "raw"
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }

    fn delete(&self) -> RemoteFuture<'_, ()> {
        Box::pin(async move {
            self.cloud.record(CloudOp::DeleteDisk, &self.id, None)?;
            self.cloud
                .state()
                .volumes
                .remove(&self.id)
                .map(|_| ())
                .ok_or_else(|| RemoteError::not_found("disk", &self.id))
        })
    }

    fn resize(&self, size_gb: u64) -> RemoteFuture<'_, ()> {
        Box::pin(async move {
            self.cloud
                .record(CloudOp::ResizeDisk, &self.id, Some(size_gb))?;
            let mut state = self.cloud.state();
            let volume = state
                .volumes
                .get_mut(&self.id)
                .ok_or_else(|| RemoteError::not_found("disk", &self.id))?;
            volume.size_gb = size_gb;
            Ok(())
        })
    }

    fn create_snapshot<'a>(
        &'a self,
        name: &'a str,
        _description: &'a str,
    ) -> RemoteFuture<'a, Box<dyn RemoteSnapshot>> {
        Box::pin(async move {
            self.cloud.record(CloudOp::CreateSnapshot, name, None)?;
            let mut state = self.cloud.state();
            let id = next_id(&mut state, "snap");
            state.snapshots.insert(id.clone());
            Ok(Box::new(FakeSnapshot {
                cloud: self.cloud.clone(),
                id,
            }) as Box<dyn RemoteSnapshot>)
        })
    }
}

struct FakeSnapshot {
    cloud: FakeCloud,
    id: String,
}

impl RemoteSnapshot for FakeSnapshot {
    fn id(&self) -> &str {
        &self.id
    }

    fn delete(&self) -> RemoteFuture<'_, ()> {
        Box::pin(async move {
            self.cloud
                .record(CloudOp::DeleteSnapshot, &self.id, None)?;
            self.cloud.state().snapshots.remove(&self.id);
            Ok(())
        })
    }
}

struct FakeImage {
    cloud: FakeCloud,
    id: String,
}

impl RemoteImage for FakeImage {
    fn id(&self) -> &str {
        &self.id
    }

    fn delete(&self) -> RemoteFuture<'_, ()> {
        Box::pin(async move {
            self.cloud.record(CloudOp::DeleteImage, &self.id, None)?;
            self.cloud.state().images.remove(&self.id);
            Ok(())
        })
    }
}

/// Builds a host record for `host_type`.
#[must_use]
pub fn host(host_type: &str) -> Host {
    Host {
        id: String::from("host-1"),
        name: String::from("fake-host"),
        host_type: host_type.to_owned(),
    }
}
