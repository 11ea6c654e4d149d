//! Command-line interface definitions for the `hostdrive` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `hostdrive` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hostdrive",
    about = "Drive disks and cached images on cloud hosts",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List the registered host types.
    #[command(name = "host-types", about = "List the registered host types")]
    HostTypes,
    /// Check a disk size against a host type's size table.
    #[command(
        name = "validate-disk-size",
        about = "Check a disk size against a host type's size table"
    )]
    ValidateDiskSize(ValidateDiskSizeCommand),
    /// Allocate a Scaleway volume.
    #[command(name = "allocate", about = "Allocate a Scaleway volume")]
    Allocate(AllocateCommand),
    /// Delete a Scaleway volume. Absent volumes are treated as deleted.
    #[command(name = "deallocate", about = "Delete a Scaleway volume")]
    Deallocate(DeallocateCommand),
    /// Grow a Scaleway volume.
    #[command(name = "resize", about = "Grow a Scaleway volume")]
    Resize(ResizeCommand),
    /// Make an image available in the configured Scaleway zone.
    #[command(
        name = "cache-image",
        about = "Make an image available in the configured Scaleway zone"
    )]
    CacheImage(CacheImageCommand),
}

/// Arguments for the `hostdrive validate-disk-size` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ValidateDiskSizeCommand {
    /// Host type whose size table applies (for example `aws`).
    #[arg(long, value_name = "HOST_TYPE")]
    pub(crate) host_type: String,
    /// Storage class of the disk (for example `gp2` or `b_ssd`).
    #[arg(long, value_name = "TYPE")]
    pub(crate) storage_type: String,
    /// Requested size in GiB.
    #[arg(long, value_name = "GB")]
    pub(crate) size_gb: u64,
}

/// Arguments for the `hostdrive allocate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct AllocateCommand {
    /// Name of the new volume.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: String,
    /// Requested size in MiB; rounded up to whole GiB.
    #[arg(long, value_name = "MB")]
    pub(crate) size_mb: u64,
    /// Volume type.
    #[arg(long, value_name = "TYPE", default_value = "b_ssd")]
    pub(crate) storage_type: String,
}

/// Arguments for the `hostdrive deallocate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeallocateCommand {
    /// Scaleway identifier of the volume.
    #[arg(long, value_name = "ID")]
    pub(crate) external_id: String,
}

/// Arguments for the `hostdrive resize` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ResizeCommand {
    /// Scaleway identifier of the volume.
    #[arg(long, value_name = "ID")]
    pub(crate) external_id: String,
    /// New size in MiB; rounded up to whole GiB.
    #[arg(long, value_name = "MB")]
    pub(crate) size_mb: u64,
    /// Volume type, checked against the size table.
    #[arg(long, value_name = "TYPE", default_value = "b_ssd")]
    pub(crate) storage_type: String,
    /// Resize while the server is running.
    #[arg(long)]
    pub(crate) online: bool,
}

/// Arguments for the `hostdrive cache-image` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CacheImageCommand {
    /// Image label or identifier to resolve.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: String,
    /// CPU architecture; defaults to the configured architecture.
    #[arg(long, value_name = "ARCH")]
    pub(crate) arch: Option<String>,
    /// Resolve again even when the image is already cached.
    #[arg(long)]
    pub(crate) force: bool,
}
