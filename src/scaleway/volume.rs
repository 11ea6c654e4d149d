//! Instance API volumes and snapshots behind [`RemoteStorage`].

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::http::{Call, execute, execute_json};
use super::types::{SnapshotId, VolumeId};
use super::ScalewayClient;
use crate::remote::{
    DiskDescriptor, RemoteDisk, RemoteError, RemoteFuture, RemoteSnapshot, RemoteStorage,
};

const BYTES_PER_GIB_SHIFT: u32 = 30;
const BYTES_PER_MIB_SHIFT: u32 = 20;
const VOLUME_FORMAT: &str = "raw";

#[derive(Serialize)]
struct CreateVolumeRequest<'a> {
    name: &'a str,
    size: u64,
    volume_type: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

#[derive(Serialize)]
struct ResizeVolumeRequest {
    size: u64,
}

#[derive(Serialize)]
struct CreateSnapshotRequest<'a> {
    name: &'a str,
    volume_id: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: ScalewayVolume,
}

#[derive(Clone, Debug, Deserialize)]
struct ScalewayVolume {
    id: String,
    size: u64,
    volume_type: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct SnapshotEnvelope {
    snapshot: ScalewaySnapshotBody,
}

#[derive(Deserialize)]
struct ScalewaySnapshotBody {
    id: String,
}

fn gib_to_bytes(size_gb: u64, operation: &str) -> Result<u64, RemoteError> {
    size_gb
        .checked_mul(1_u64 << BYTES_PER_GIB_SHIFT)
        .ok_or_else(|| RemoteError::operation(operation, format!("{size_gb}GB is too large")))
}

/// Block storage of one volume type in the client's zone.
#[derive(Clone, Debug)]
pub struct ScalewayStorage {
    client: ScalewayClient,
    storage_type: String,
}

impl ScalewayStorage {
    pub(super) const fn new(client: ScalewayClient, storage_type: String) -> Self {
        Self {
            client,
            storage_type,
        }
    }

    async fn create(
        &self,
        name: &str,
        size_gb: u64,
        descriptor: &DiskDescriptor,
    ) -> Result<Box<dyn RemoteDisk>, RemoteError> {
        let volume_type = if descriptor.storage_type.is_empty() {
            self.storage_type.as_str()
        } else {
            descriptor.storage_type.as_str()
        };
        let config = self.client.config();
        let payload = CreateVolumeRequest {
            name,
            size: gib_to_bytes(size_gb, "create_volume")?,
            volume_type,
            project: &config.default_project_id,
            organization: config.default_organization_id.as_deref(),
            tags: ScalewayClient::tags(
                descriptor
                    .tags
                    .iter()
                    .map(|(key, value)| (key.as_str(), value.as_str())),
            ),
        };
        let request = self.client.request(Method::POST, "/volumes").json(&payload);
        let parsed: VolumeEnvelope =
            execute_json(request, Call::new("create_volume", "disk", name)).await?;
        info!(
            volume_id = %parsed.volume.id,
            volume_type,
            size_gb,
            "created scaleway volume"
        );
        Ok(Box::new(ScalewayDisk::new(self.client.clone(), parsed.volume)))
    }

    async fn fetch(&self, external_id: &str) -> Result<Box<dyn RemoteDisk>, RemoteError> {
        let path = VolumeId::new(external_id).path();
        let request = self.client.request(Method::GET, &path);
        let parsed: VolumeEnvelope =
            execute_json(request, Call::new("get_volume", "disk", external_id)).await?;
        Ok(Box::new(ScalewayDisk::new(self.client.clone(), parsed.volume)))
    }
}

impl RemoteStorage for ScalewayStorage {
    fn create_disk<'a>(
        &'a self,
        name: &'a str,
        size_gb: u64,
        descriptor: &'a DiskDescriptor,
    ) -> RemoteFuture<'a, Box<dyn RemoteDisk>> {
        Box::pin(self.create(name, size_gb, descriptor))
    }

    fn get_disk<'a>(&'a self, external_id: &'a str) -> RemoteFuture<'a, Box<dyn RemoteDisk>> {
        Box::pin(self.fetch(external_id))
    }
}

/// One Instance API volume.
struct ScalewayDisk {
    client: ScalewayClient,
    id: VolumeId,
    volume: ScalewayVolume,
}

impl ScalewayDisk {
    fn new(client: ScalewayClient, volume: ScalewayVolume) -> Self {
        Self {
            client,
            id: VolumeId::new(volume.id.as_str()),
            volume,
        }
    }

    async fn grow(&self, size_gb: u64) -> Result<(), RemoteError> {
        let payload = ResizeVolumeRequest {
            size: gib_to_bytes(size_gb, "resize_volume")?,
        };
        let request = self
            .client
            .request(Method::PATCH, &self.id.path())
            .json(&payload);
        execute(request, Call::new("resize_volume", "disk", &self.id)).await?;
        info!(volume_id = %self.id.as_str(), size_gb, "resized scaleway volume");
        Ok(())
    }

    async fn remove(&self) -> Result<(), RemoteError> {
        let request = self.client.request(Method::DELETE, &self.id.path());
        execute(request, Call::new("delete_volume", "disk", &self.id)).await?;
        info!(volume_id = %self.id.as_str(), "deleted scaleway volume");
        Ok(())
    }

    async fn snapshot(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Box<dyn RemoteSnapshot>, RemoteError> {
        let payload = CreateSnapshotRequest {
            name,
            volume_id: &self.id,
            project: &self.client.config().default_project_id,
            tags: ScalewayClient::tags([("description", description)]),
        };
        let request = self
            .client
            .request(Method::POST, "/snapshots")
            .json(&payload);
        let parsed: SnapshotEnvelope =
            execute_json(request, Call::new("create_snapshot", "disk", &self.id)).await?;
        Ok(Box::new(ScalewaySnapshot {
            client: self.client.clone(),
            id: SnapshotId::new(parsed.snapshot.id),
        }))
    }
}

impl RemoteDisk for ScalewayDisk {
    fn global_id(&self) -> &str {
        &self.id
    }

    fn size_mb(&self) -> u64 {
        self.volume.size >> BYTES_PER_MIB_SHIFT
    }

    fn format(&self) -> &str {
        VOLUME_FORMAT
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata: BTreeMap<String, String> = self
            .volume
            .tags
            .iter()
            .filter_map(|tag| tag.split_once('='))
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        metadata.insert(String::from("zone"), self.volume.zone.clone());
        metadata.insert(
            String::from("volume_type"),
            self.volume.volume_type.clone(),
        );
        metadata.insert(String::from("state"), self.volume.state.clone());
        metadata
    }

    fn delete(&self) -> RemoteFuture<'_, ()> {
        Box::pin(self.remove())
    }

    fn resize(&self, size_gb: u64) -> RemoteFuture<'_, ()> {
        Box::pin(self.grow(size_gb))
    }

    fn create_snapshot<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> RemoteFuture<'a, Box<dyn RemoteSnapshot>> {
        Box::pin(self.snapshot(name, description))
    }
}

/// One Instance API snapshot.
struct ScalewaySnapshot {
    client: ScalewayClient,
    id: SnapshotId,
}

impl ScalewaySnapshot {
    async fn remove(&self) -> Result<(), RemoteError> {
        let path = self.id.path();
        let request = self.client.request(Method::DELETE, &path);
        execute(request, Call::new("delete_snapshot", "snapshot", &self.id)).await?;
        info!(snapshot_id = %self.id.as_str(), "deleted scaleway snapshot");
        Ok(())
    }
}

impl RemoteSnapshot for ScalewaySnapshot {
    fn id(&self) -> &str {
        &self.id
    }

    fn delete(&self) -> RemoteFuture<'_, ()> {
        Box::pin(self.remove())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::scaleway::tests::client;

    fn disk(tags: &[&str]) -> ScalewayDisk {
        ScalewayDisk::new(
            client(),
            ScalewayVolume {
                id: String::from("vol-1"),
                size: 20 << BYTES_PER_GIB_SHIFT,
                volume_type: String::from("b_ssd"),
                state: String::from("available"),
                zone: String::from("fr-par-1"),
                tags: tags.iter().map(|tag| (*tag).to_owned()).collect(),
            },
        )
    }

    #[rstest]
    #[case(1, Some(1_073_741_824))]
    #[case(20, Some(21_474_836_480))]
    #[case(u64::MAX, None)]
    fn gib_sizes_convert_to_bytes(#[case] size_gb: u64, #[case] expected: Option<u64>) {
        assert_eq!(gib_to_bytes(size_gb, "create_volume").ok(), expected);
    }

    #[test]
    fn size_is_reported_in_mib() {
        assert_eq!(disk(&[]).size_mb(), 20 * 1024);
        assert_eq!(disk(&[]).format(), "raw");
        assert_eq!(disk(&[]).global_id(), "vol-1");
    }

    #[test]
    fn metadata_merges_tags_and_placement() {
        let metadata = disk(&["team=storage", "untagged"]).metadata();
        assert_eq!(metadata.get("team").map(String::as_str), Some("storage"));
        assert_eq!(metadata.get("zone").map(String::as_str), Some("fr-par-1"));
        assert_eq!(
            metadata.get("volume_type").map(String::as_str),
            Some("b_ssd")
        );
        assert!(!metadata.contains_key("untagged"));
    }

    #[test]
    fn volume_envelopes_ignore_unknown_fields() {
        let parsed: VolumeEnvelope = crate::scaleway::http::decode(
            br#"{"volume":{"id":"vol-9","size":1073741824,"volume_type":"l_ssd","server":null}}"#,
            "get_volume",
        )
        .expect("decoded");
        assert_eq!(parsed.volume.id, "vol-9");
        assert!(parsed.volume.tags.is_empty());
    }
}
