//! Unit tests for the Scaleway facade.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use camino::Utf8Path;
use rstest::rstest;
use scaleway_rs::ScalewayImage;

use super::image::{ImageQuery, export_key, filter_images, resolve_image_id_with, select_image_id};
use super::{ScalewayBackendError, ScalewayClient};
use crate::config::ScalewayConfig;
use crate::remote::{RemoteError, RemoteStorageCache};

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn available(id: &'static str, creation_date: &'static str) -> ScalewayImage {
    image(ImageSpec {
        id,
        arch: "x86_64",
        state: "available",
        creation_date,
    })
}

pub(super) fn config() -> ScalewayConfig {
    ScalewayConfig {
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("fr-par-2"),
        default_architecture: String::from("x86_64"),
        export_bucket: None,
    }
}

pub(super) fn client() -> ScalewayClient {
    ScalewayClient::new(config()).expect("valid config")
}

fn query() -> ImageQuery {
    ImageQuery {
        label: String::from("ubuntu_noble"),
        arch: String::from("x86_64"),
        zone: String::from("fr-par-2"),
        project_id: String::from("proj"),
        organisation_id: None,
    }
}

#[test]
fn new_rejects_incomplete_config() {
    let err = ScalewayClient::new(ScalewayConfig {
        secret_key: String::new(),
        ..config()
    })
    .expect_err("secret key is required");
    assert!(matches!(err, ScalewayBackendError::Config(_)));
}

#[test]
fn storage_cache_is_named_after_bucket_or_zone() {
    assert_eq!(client().storage_cache().id(), "fr-par-2");

    let with_bucket = ScalewayClient::new(ScalewayConfig {
        export_bucket: Some(String::from("exports")),
        ..config()
    })
    .expect("valid config");
    assert_eq!(with_bucket.storage_cache().id(), "exports");
}

#[tokio::test]
async fn download_without_bucket_is_unsupported() {
    let cache = client().storage_cache();
    let err = cache
        .download_image("img-1", "ext-1", Utf8Path::new("/tmp/hostdrive/img-1"))
        .await
        .expect_err("no export bucket");
    assert_eq!(
        err,
        RemoteError::Unsupported {
            operation: String::from("download_image")
        }
    );
}

#[rstest]
#[case("/tmp/hostdrive/img-1", "tmp/hostdrive/img-1/img-1.qcow2")]
#[case("exports/", "exports/img-1.qcow2")]
#[case("/", "img-1.qcow2")]
fn export_keys_drop_surrounding_slashes(#[case] dest: &str, #[case] expected: &str) {
    assert_eq!(export_key(Utf8Path::new(dest), "img-1"), expected);
}

#[test]
fn tags_skip_empty_values() {
    let tags = ScalewayClient::tags([("os_type", "Linux"), ("os_version", ""), ("", "x")]);
    assert_eq!(tags, ["os_type=Linux"]);
}

#[test]
fn image_not_found_maps_to_remote_not_found() {
    let err = ScalewayBackendError::ImageNotFound {
        label: String::from("ubuntu_noble"),
        arch: String::from("arm64"),
        zone: String::from("fr-par-2"),
    };
    assert_eq!(
        err.into_remote("upload_image"),
        RemoteError::not_found("image", "ubuntu_noble")
    );

    let provider = ScalewayBackendError::Provider {
        message: String::from("quota exceeded"),
    };
    assert_eq!(
        provider.into_remote("upload_image").to_string(),
        "upload_image failed: provider error: quota exceeded"
    );
}

#[test]
fn select_image_id_returns_newest_creation_date() {
    let images = vec![
        available("older", "2025-01-01T00:00:00Z"),
        available("newest", "2025-02-01T00:00:00Z"),
    ];

    let id = select_image_id(images, &query()).expect("image selected");
    assert_eq!(id, "newest");
}

#[test]
fn select_image_id_errors_on_empty() {
    let err = select_image_id(Vec::new(), &query()).expect_err("empty candidates should fail");
    assert!(matches!(err, ScalewayBackendError::ImageNotFound { .. }));
}

#[test]
fn filter_images_keeps_available_matching_arch() {
    let images = vec![
        available("keep", "2025-01-01T00:00:00Z"),
        image(ImageSpec {
            id: "arm",
            arch: "arm64",
            state: "available",
            creation_date: "2025-03-01T00:00:00Z",
        }),
        image(ImageSpec {
            id: "creating",
            arch: "x86_64",
            state: "creating",
            creation_date: "2025-03-01T00:00:00Z",
        }),
    ];

    let ids: Vec<_> = filter_images(images, &query())
        .into_iter()
        .map(|img| img.id)
        .collect();
    assert_eq!(ids, ["keep"]);
}

#[tokio::test]
async fn resolve_image_id_prefers_project_results() {
    let public_called = Rc::new(Cell::new(false));

    let result = resolve_image_id_with(
        &query(),
        || async { Ok(vec![available("project-img", "2025-02-01T00:00:00Z")]) },
        {
            let flag = Rc::clone(&public_called);
            move || {
                flag.set(true);
                async { Ok(vec![available("public-img", "2025-01-01T00:00:00Z")]) }
            }
        },
    )
    .await;

    assert_eq!(result, Ok(String::from("project-img")));
    assert!(!public_called.get());
}

#[tokio::test]
async fn resolve_image_id_falls_back_to_public_images() {
    let result = resolve_image_id_with(
        &query(),
        || async { Ok(Vec::new()) },
        || async { Ok(vec![available("public-img", "2025-01-01T00:00:00Z")]) },
    )
    .await;

    assert_eq!(result, Ok(String::from("public-img")));
}

#[tokio::test]
async fn resolve_image_id_propagates_provider_errors() {
    let result = resolve_image_id_with(
        &query(),
        || async {
            Err(ScalewayBackendError::Provider {
                message: String::from("unauthorised"),
            })
        },
        || async { Ok(Vec::new()) },
    )
    .await;

    assert!(matches!(result, Err(ScalewayBackendError::Provider { .. })));
}
