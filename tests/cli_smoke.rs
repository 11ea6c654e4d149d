//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn hostdrive(workdir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("hostdrive");
    cmd.current_dir(workdir.path())
        .env_remove("RUST_LOG")
        .env_remove("HOSTDRIVE_CONFIG_PATH")
        .env("HOSTDRIVE_STAGING_PATH", workdir.path().join("staging"));
    cmd
}

#[test]
fn host_types_lists_registered_drivers() {
    let workdir = TempDir::new().expect("temp dir");
    hostdrive(&workdir)
        .arg("host-types")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"aws\"").and(predicate::str::contains("\"scaleway\"")));
}

#[test]
fn validate_disk_size_accepts_in_range_sizes() {
    let workdir = TempDir::new().expect("temp dir");
    hostdrive(&workdir)
        .args([
            "validate-disk-size",
            "--host-type",
            "scaleway",
            "--storage-type",
            "l_ssd",
            "--size-gb",
            "800",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"));
}

#[test]
fn validate_disk_size_reports_the_allowed_range() {
    let workdir = TempDir::new().expect("temp dir");
    hostdrive(&workdir)
        .args([
            "validate-disk-size",
            "--host-type",
            "aws",
            "--storage-type",
            "st1",
            "--size-gb",
            "100",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "the st1 disk size must be in the range of 500GB ~ 16384GB, got 100GB",
        ));
}

#[test]
fn missing_subcommand_prints_help() {
    let workdir = TempDir::new().expect("temp dir");
    hostdrive(&workdir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
