//! Behavioural properties of the host drivers against the scripted cloud.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use hostdrive::driver::{DriverContext, HostDriver, ScalewayHostDriver};
use hostdrive::models::Disk;
use hostdrive::registry::{
    CachedImageKey, CachedImageRegistry, CachedImageStatus, InMemoryCachedImageRegistry,
};
use hostdrive::remote::RemoteError;
use hostdrive::staging::StagingArea;
use hostdrive::store::{DiskStore, InMemoryDiskStore};
use hostdrive::task::{Principal, ResultDocument, Task, TaskReceipt, TaskRunner};
use hostdrive::test_support::{CloudOp, FAKE_STORAGE_CACHE_ID, FakeCloud, host};
use rstest::rstest;
use serde_json::{Value, json};
use tempfile::TempDir;

struct World {
    cloud: FakeCloud,
    disks: Arc<InMemoryDiskStore>,
    images: Arc<InMemoryCachedImageRegistry>,
    driver: ScalewayHostDriver,
    staging: TempDir,
}

fn world() -> World {
    let staging = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(staging.path().join("exports")).expect("utf8 path");
    let disks = Arc::new(InMemoryDiskStore::new());
    let images = Arc::new(InMemoryCachedImageRegistry::new());
    let context = DriverContext::new(
        TaskRunner::new(4, 16),
        Arc::clone(&images) as Arc<dyn CachedImageRegistry>,
        Arc::clone(&disks) as Arc<dyn DiskStore>,
        StagingArea::new(root),
    );
    World {
        cloud: FakeCloud::new(),
        disks,
        images,
        driver: ScalewayHostDriver::new(context),
        staging,
    }
}

fn task(params: Value) -> (Task, TaskReceipt) {
    let document: ResultDocument = match params {
        Value::Object(map) => map,
        _ => ResultDocument::new(),
    };
    Task::new(document, Principal::new("user-1", "project-1"))
}

fn key(image_id: &str) -> CachedImageKey {
    CachedImageKey::new(FAKE_STORAGE_CACHE_ID, image_id)
}

#[rstest]
#[case("b_ssd", 1, true)]
#[case("b_ssd", 10_000, true)]
#[case("b_ssd", 0, false)]
#[case("b_ssd", 10_001, false)]
#[case("l_ssd", 800, true)]
#[case("l_ssd", 801, false)]
#[case("gp2", 10, false)]
#[tokio::test]
async fn size_table_bounds_are_inclusive(
    #[case] storage_type: &str,
    #[case] size_gb: u64,
    #[case] accepted: bool,
) {
    let w = world();
    assert_eq!(
        w.driver.validate_disk_size(storage_type, size_gb).is_ok(),
        accepted
    );
}

#[tokio::test]
async fn deallocating_an_absent_volume_is_idempotent() {
    let w = world();
    let storage = w.cloud.storage("b_ssd");
    let mut disk = Disk::new("disk-1", "storage-1", "data", 1024);
    disk.external_id = Some(String::from("vol-missing"));
    w.disks.insert(disk.clone());

    for _ in 0..2 {
        let (t, receipt) = task(json!({}));
        w.driver
            .request_deallocate_disk_on_host(&host("scaleway"), &storage, &disk, t)
            .await
            .expect("accepted");
        assert_eq!(
            receipt.wait().await.expect("completed"),
            Ok(ResultDocument::new())
        );
    }
}

#[tokio::test]
async fn allocating_100_mib_requests_one_gib() {
    let w = world();
    let storage = w.cloud.storage("b_ssd");
    let disk = Disk::new("disk-1", "storage-1", "data", 0);
    w.disks.insert(disk.clone());
    let (t, receipt) = task(json!({}));

    w.driver
        .request_allocate_disk_on_storage(&host("scaleway"), &storage, &disk, 100, t)
        .await
        .expect("accepted");
    receipt
        .wait()
        .await
        .expect("completed")
        .expect("allocation succeeded");

    let sizes: Vec<_> = w
        .cloud
        .calls_of(CloudOp::CreateDisk)
        .into_iter()
        .map(|call| call.size_gb)
        .collect();
    assert_eq!(sizes, [Some(1)]);
}

#[tokio::test]
async fn concurrent_caching_leaves_one_ready_row() {
    let w = world();
    w.cloud.set_upload_delay(Duration::from_millis(20));
    let storage = w.cloud.storage("b_ssd");
    let cache = storage.cache.clone().expect("cache");

    let mut receipts = Vec::new();
    for _ in 0..3 {
        let (t, receipt) = task(json!({ "image_id": "img-1", "os_arch": "x86_64" }));
        w.driver
            .check_and_set_cache_image(&host("scaleway"), &cache, t)
            .await
            .expect("accepted");
        receipts.push(receipt);
    }
    for receipt in receipts {
        receipt
            .wait()
            .await
            .expect("completed")
            .expect("cache succeeded");
    }

    assert_eq!(w.images.len(), 1);
    let row = w.images.get(&key("img-1")).expect("row");
    assert_eq!(row.status, CachedImageStatus::Ready);
    assert_eq!(row.external_id.as_deref(), Some("ext-img-1"));
    assert_eq!(w.cloud.calls_of(CloudOp::UploadImage).len(), 3);
}

#[tokio::test]
async fn failed_upload_is_retried_through_caching() {
    let w = world();
    let storage = w.cloud.storage("b_ssd");
    let cache = storage.cache.clone().expect("cache");
    w.cloud.fail_next(
        CloudOp::UploadImage,
        RemoteError::operation("upload_image", "bucket unreachable"),
    );

    let (first, first_receipt) = task(json!({ "image_id": "img-2" }));
    w.driver
        .check_and_set_cache_image(&host("scaleway"), &cache, first)
        .await
        .expect("accepted");
    assert!(first_receipt.wait().await.expect("completed").is_err());

    let failed = w.images.get(&key("img-2")).expect("row");
    assert_eq!(failed.status, CachedImageStatus::CacheFailed);
    assert_eq!(
        failed.status_message,
        "upload_image failed: bucket unreachable"
    );

    w.cloud.set_upload_delay(Duration::from_millis(100));
    let (retry, retry_receipt) = task(json!({ "image_id": "img-2", "is_force": true }));
    w.driver
        .check_and_set_cache_image(&host("scaleway"), &cache, retry)
        .await
        .expect("accepted");

    tokio::time::timeout(Duration::from_secs(1), async {
        while w.images.get(&key("img-2")).map(|row| row.status)
            != Some(CachedImageStatus::Caching)
        {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("retry passes through caching");

    retry_receipt
        .wait()
        .await
        .expect("completed")
        .expect("retry succeeded");
    assert_eq!(
        w.images.get(&key("img-2")).map(|row| row.status),
        Some(CachedImageStatus::Ready)
    );
}

#[tokio::test]
async fn save_upload_is_ready_even_when_cleanup_fails() {
    let w = world();
    let storage = w.cloud.storage("b_ssd");
    let volume = w.cloud.insert_volume(20);
    let mut disk = Disk::new("disk-1", "storage-1", "data", 20 * 1024);
    disk.external_id = Some(volume);
    w.disks.insert(disk.clone());
    w.cloud.fail_next(
        CloudOp::DeleteImage,
        RemoteError::operation("delete_image", "image in use"),
    );
    w.cloud.fail_next(
        CloudOp::DeleteSnapshot,
        RemoteError::operation("delete_snapshot", "snapshot locked"),
    );
    let (t, receipt) = task(json!({ "properties": { "os_type": "Linux" } }));

    w.driver
        .request_save_upload_image_on_host(&host("scaleway"), &storage, &disk, "img-3", t)
        .await
        .expect("accepted");

    let document = receipt.wait().await.expect("completed").expect("saved");
    let expected_path = w.staging.path().join("exports").join("img-3");
    assert_eq!(
        document.get("path").and_then(Value::as_str),
        expected_path.to_str()
    );
    assert!(expected_path.is_dir());

    let row = w.images.get(&key("img-3")).expect("row");
    assert_eq!(row.status, CachedImageStatus::Ready);
    assert!(row.external_id.is_some_and(|id| !id.is_empty()));
    assert_eq!(w.cloud.live_images().len(), 1);
    assert_eq!(w.cloud.live_snapshots().len(), 1);
    assert_eq!(
        w.cloud
            .calls_of(CloudOp::CreateSnapshot)
            .first()
            .map(|call| call.target.as_str()),
        Some("Snapshot-img-3")
    );
}

#[tokio::test]
async fn save_upload_download_failure_marks_cache_failed() {
    let w = world();
    let storage = w.cloud.storage("b_ssd");
    let volume = w.cloud.insert_volume(20);
    let mut disk = Disk::new("disk-1", "storage-1", "data", 20 * 1024);
    disk.external_id = Some(volume);
    w.disks.insert(disk.clone());
    w.cloud.fail_next(
        CloudOp::DownloadImage,
        RemoteError::operation("download_image", "export timed out"),
    );
    let (t, receipt) = task(json!({}));

    w.driver
        .request_save_upload_image_on_host(&host("scaleway"), &storage, &disk, "img-4", t)
        .await
        .expect("accepted");

    assert!(receipt.wait().await.expect("completed").is_err());
    let row = w.images.get(&key("img-4")).expect("row");
    assert_eq!(row.status, CachedImageStatus::CacheFailed);
    assert_eq!(
        row.status_message,
        "remote operation failed: download_image failed: export timed out"
    );
    assert!(w.cloud.live_snapshots().is_empty());
}

#[tokio::test]
async fn save_upload_image_creation_failure_stops_before_download() {
    let w = world();
    let storage = w.cloud.storage("b_ssd");
    let volume = w.cloud.insert_volume(20);
    let mut disk = Disk::new("disk-1", "storage-1", "data", 20 * 1024);
    disk.external_id = Some(volume);
    w.disks.insert(disk.clone());
    w.cloud.fail_next(
        CloudOp::CreateImage,
        RemoteError::operation("create_image", "image quota reached"),
    );
    let (t, receipt) = task(json!({}));

    w.driver
        .request_save_upload_image_on_host(&host("scaleway"), &storage, &disk, "img-5", t)
        .await
        .expect("accepted");

    assert!(receipt.wait().await.expect("completed").is_err());
    let row = w.images.get(&key("img-5")).expect("row");
    assert_eq!(row.status, CachedImageStatus::CacheFailed);
    assert_eq!(
        row.status_message,
        "create_image failed: image quota reached"
    );
    assert!(w.cloud.calls_of(CloudOp::DownloadImage).is_empty());
    assert!(w.cloud.live_snapshots().is_empty());
    assert!(w.cloud.live_images().is_empty());
}
