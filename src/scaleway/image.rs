//! Image resolution, creation and export behind [`RemoteStorageCache`].

use std::future::Future;
use std::time::Instant;

use camino::Utf8Path;
use reqwest::Method;
use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info};

use super::http::{Call, execute, execute_json};
use super::types::{ImageId, SnapshotId};
use super::{ScalewayBackendError, ScalewayClient};
use crate::remote::{RemoteError, RemoteFuture, RemoteImage, RemoteStorageCache, UploadImageRequest};
use crate::task::ResultDocument;

const BYTES_PER_MIB_SHIFT: u32 = 20;
const EXPORT_FORMAT: &str = "qcow2";
const TASK_SUCCESS: &str = "success";
const TASK_FAILURE: &str = "failure";

/// Marketplace lookup parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct ImageQuery {
    pub(super) label: String,
    pub(super) arch: String,
    pub(super) zone: String,
    pub(super) project_id: String,
    pub(super) organisation_id: Option<String>,
}

#[derive(Serialize)]
struct CreateImageRequest<'a> {
    name: &'a str,
    root_volume: &'a str,
    arch: &'a str,
    project: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

#[derive(Serialize)]
struct ExportSnapshotRequest<'a> {
    bucket: &'a str,
    key: &'a str,
}

#[derive(Deserialize)]
struct ImageEnvelope {
    image: ImageBody,
}

#[derive(Deserialize)]
struct ImageBody {
    id: String,
    root_volume: Option<RootVolume>,
}

#[derive(Deserialize)]
struct RootVolume {
    id: String,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize)]
struct TaskEnvelope {
    task: ProviderTask,
}

#[derive(Deserialize)]
struct ProviderTask {
    id: String,
    #[serde(default)]
    status: String,
}

/// Image cache of one zone, exporting into the configured bucket.
#[derive(Clone, Debug)]
pub struct ScalewayStorageCache {
    client: ScalewayClient,
    id: String,
}

impl ScalewayStorageCache {
    pub(super) fn new(client: ScalewayClient) -> Self {
        let id = client
            .config()
            .export_bucket
            .clone()
            .unwrap_or_else(|| String::from(client.zone.as_str()));
        Self { client, id }
    }

    fn query(&self, request: &UploadImageRequest) -> ImageQuery {
        let config = self.client.config();
        ImageQuery {
            label: request.image_id.clone(),
            arch: request
                .os_arch
                .clone()
                .unwrap_or_else(|| config.default_architecture.clone()),
            zone: String::from(self.client.zone.as_str()),
            project_id: config.default_project_id.clone(),
            organisation_id: config.default_organization_id.clone(),
        }
    }

    async fn fetch_image(&self, image_id: &str) -> Result<ImageBody, RemoteError> {
        let path = ImageId::new(image_id).path();
        let request = self.client.request(Method::GET, &path);
        let parsed: ImageEnvelope =
            execute_json(request, Call::new("get_image", "image", image_id)).await?;
        Ok(parsed.image)
    }

    async fn create(
        &self,
        snapshot_id: &str,
        name: &str,
        os_type: &str,
        os_version: &str,
    ) -> Result<Box<dyn RemoteImage>, RemoteError> {
        let config = self.client.config();
        let payload = CreateImageRequest {
            name,
            root_volume: snapshot_id,
            arch: &config.default_architecture,
            project: &config.default_project_id,
            tags: ScalewayClient::tags([("os_type", os_type), ("os_version", os_version)]),
        };
        let request = self.client.request(Method::POST, "/images").json(&payload);
        let parsed: ImageEnvelope =
            execute_json(request, Call::new("create_image", "snapshot", snapshot_id)).await?;
        info!(image_id = %parsed.image.id, snapshot_id, "created scaleway image");
        Ok(Box::new(ScalewayImageHandle {
            client: self.client.clone(),
            id: ImageId::new(parsed.image.id),
        }))
    }

    async fn upload(&self, request: &UploadImageRequest) -> Result<String, RemoteError> {
        if let (Some(existing), false) = (request.existing_external_id.as_deref(), request.force) {
            match self.fetch_image(existing).await {
                Ok(image) => {
                    debug!(image_id = %image.id, "scaleway image already cached");
                    return Ok(image.id);
                }
                Err(err) if err.is_not_found() => {
                    debug!(image_id = existing, "cached scaleway image vanished, resolving again");
                }
                Err(err) => return Err(err),
            }
        }
        let query = self.query(request);
        let id = self
            .resolve_image_id(&query)
            .await
            .map_err(|err| err.into_remote("upload_image"))?;
        info!(label = %query.label, image_id = %id, "resolved scaleway image");
        Ok(id)
    }

    async fn resolve_image_id(&self, query: &ImageQuery) -> Result<String, ScalewayBackendError> {
        let api = &self.client.api;
        resolve_image_id_with(
            query,
            || async move {
                if query.project_id.is_empty() {
                    Ok(Vec::new())
                } else {
                    let mut scoped = ScalewayListInstanceImagesBuilder::new(api.clone(), &query.zone)
                        .public(true)
                        .project(&query.project_id)
                        .name(&query.label)
                        .arch(&query.arch);
                    if let Some(org) = &query.organisation_id {
                        scoped = scoped.organization(org);
                    }
                    scoped.run_async().await.map_err(ScalewayBackendError::from)
                }
            },
            || async move {
                ScalewayListInstanceImagesBuilder::new(api.clone(), &query.zone)
                    .public(true)
                    .name(&query.label)
                    .arch(&query.arch)
                    .run_async()
                    .await
                    .map_err(ScalewayBackendError::from)
            },
        )
        .await
    }

    async fn export(
        &self,
        image_id: &str,
        external_id: &str,
        dest: &Utf8Path,
    ) -> Result<ResultDocument, RemoteError> {
        let Some(bucket) = self.client.config().export_bucket.as_deref() else {
            return Err(RemoteError::Unsupported {
                operation: String::from("download_image"),
            });
        };
        let image = self.fetch_image(external_id).await?;
        let Some(root) = image.root_volume else {
            return Err(RemoteError::operation(
                "download_image",
                format!("image {external_id} has no root volume"),
            ));
        };
        let key = export_key(dest, image_id);
        let path = format!("{}/export", SnapshotId::new(root.id.as_str()).path());
        let request = self
            .client
            .request(Method::POST, &path)
            .json(&ExportSnapshotRequest { bucket, key: &key });
        let parsed: TaskEnvelope =
            execute_json(request, Call::new("export_snapshot", "snapshot", &root.id)).await?;
        info!(
            image_id,
            snapshot_id = %root.id,
            bucket,
            key = %key,
            export_task = %parsed.task.id,
            "started scaleway snapshot export"
        );
        let status = self.wait_for_task(&parsed.task).await?;

        let mut document = ResultDocument::new();
        document.insert(String::from("image_id"), Value::from(image_id));
        document.insert(
            String::from("disk_size"),
            Value::from(root.size >> BYTES_PER_MIB_SHIFT),
        );
        document.insert(String::from("disk_format"), Value::from(EXPORT_FORMAT));
        document.insert(String::from("bucket"), Value::from(bucket));
        document.insert(String::from("key"), Value::from(key));
        document.insert(String::from("path"), Value::from(dest.as_str()));
        document.insert(String::from("export_task"), Value::from(parsed.task.id));
        document.insert(String::from("export_status"), Value::from(status));
        Ok(document)
    }

    /// Polls a provider task until it succeeds, fails or times out.
    async fn wait_for_task(&self, task: &ProviderTask) -> Result<String, RemoteError> {
        let deadline = Instant::now() + self.client.wait_timeout;
        let path = format!("/tasks/{}", task.id);
        let mut status = task.status.clone();

        loop {
            match status.as_str() {
                TASK_SUCCESS => return Ok(status),
                TASK_FAILURE => {
                    return Err(RemoteError::operation(
                        "download_image",
                        format!("export task {} failed", task.id),
                    ));
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(RemoteError::operation(
                    "download_image",
                    format!("timed out waiting for export task {}", task.id),
                ));
            }
            sleep(self.client.poll_interval).await;
            let request = self.client.request(Method::GET, &path);
            let parsed: TaskEnvelope =
                execute_json(request, Call::new("get_task", "task", &task.id)).await?;
            debug!(export_task = %task.id, status = %parsed.task.status, "polled export task");
            status = parsed.task.status;
        }
    }
}

impl RemoteStorageCache for ScalewayStorageCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_image<'a>(
        &'a self,
        snapshot_id: &'a str,
        name: &'a str,
        os_type: &'a str,
        os_version: &'a str,
    ) -> RemoteFuture<'a, Box<dyn RemoteImage>> {
        Box::pin(self.create(snapshot_id, name, os_type, os_version))
    }

    fn upload_image<'a>(&'a self, request: &'a UploadImageRequest) -> RemoteFuture<'a, String> {
        Box::pin(self.upload(request))
    }

    fn download_image<'a>(
        &'a self,
        image_id: &'a str,
        external_id: &'a str,
        dest: &'a Utf8Path,
    ) -> RemoteFuture<'a, ResultDocument> {
        Box::pin(self.export(image_id, external_id, dest))
    }
}

/// Transient image created from a snapshot.
struct ScalewayImageHandle {
    client: ScalewayClient,
    id: ImageId,
}

impl ScalewayImageHandle {
    async fn remove(&self) -> Result<(), RemoteError> {
        let path = self.id.path();
        let request = self.client.request(Method::DELETE, &path);
        execute(request, Call::new("delete_image", "image", &self.id)).await?;
        info!(image_id = %self.id.as_str(), "deleted scaleway image");
        Ok(())
    }
}

impl RemoteImage for ScalewayImageHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn delete(&self) -> RemoteFuture<'_, ()> {
        Box::pin(self.remove())
    }
}

/// Object key of an export: the staging path without its leading slash,
/// followed by `<image_id>.qcow2`.
pub(super) fn export_key(dest: &Utf8Path, image_id: &str) -> String {
    let prefix = dest.as_str().trim_matches('/');
    if prefix.is_empty() {
        format!("{image_id}.{EXPORT_FORMAT}")
    } else {
        format!("{prefix}/{image_id}.{EXPORT_FORMAT}")
    }
}

/// Runs the project-scoped lookup first and falls back to public images
/// only when the project has no match.
pub(super) async fn resolve_image_id_with<FutA, FutB, FetchA, FetchB>(
    query: &ImageQuery,
    project_fetch: FetchA,
    public_fetch: FetchB,
) -> Result<String, ScalewayBackendError>
where
    FetchA: FnOnce() -> FutA,
    FetchB: FnOnce() -> FutB,
    FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
    FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
{
    let project_images = project_fetch().await?;

    let public_images = if project_images.is_empty() {
        public_fetch().await?
    } else {
        Vec::new()
    };

    select_image_from_sources(project_images, public_images, query)
}

pub(super) fn select_image_id(
    mut candidates: Vec<ScalewayImage>,
    query: &ImageQuery,
) -> Result<String, ScalewayBackendError> {
    if candidates.is_empty() {
        return Err(ScalewayBackendError::ImageNotFound {
            label: query.label.clone(),
            arch: query.arch.clone(),
            zone: query.zone.clone(),
        });
    }
    candidates.sort_by(|lhs, rhs| rhs.creation_date.cmp(&lhs.creation_date));
    Ok(candidates.remove(0).id)
}

fn select_image_from_sources(
    project_images: Vec<ScalewayImage>,
    public_images: Vec<ScalewayImage>,
    query: &ImageQuery,
) -> Result<String, ScalewayBackendError> {
    let primary = if project_images.is_empty() {
        public_images
    } else {
        project_images
    };

    select_image_id(filter_images(primary, query), query)
}

pub(super) fn filter_images(images: Vec<ScalewayImage>, query: &ImageQuery) -> Vec<ScalewayImage> {
    images
        .into_iter()
        .filter(|image| image.arch == query.arch)
        .filter(|image| image.state == "available")
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::scaleway::tests::client;

    fn cache(wait_timeout: Duration) -> ScalewayStorageCache {
        client()
            .with_polling(Duration::from_millis(1), wait_timeout)
            .storage_cache()
    }

    fn task(status: &str) -> ProviderTask {
        ProviderTask {
            id: String::from("task-1"),
            status: String::from(status),
        }
    }

    #[tokio::test]
    async fn finished_exports_need_no_polling() {
        let status = cache(Duration::from_secs(1))
            .wait_for_task(&task("success"))
            .await
            .expect("export finished");
        assert_eq!(status, "success");
    }

    #[rstest]
    #[case::failed("failure", "download_image failed: export task task-1 failed")]
    #[case::timed_out(
        "pending",
        "download_image failed: timed out waiting for export task task-1"
    )]
    #[tokio::test]
    async fn unfinished_exports_fail(#[case] status: &str, #[case] message: &str) {
        let err = cache(Duration::ZERO)
            .wait_for_task(&task(status))
            .await
            .expect_err("export did not finish");
        assert_eq!(err.to_string(), message);
    }
}
