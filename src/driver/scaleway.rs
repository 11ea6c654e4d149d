//! Scaleway host driver.

use super::size::SCALEWAY_DISK_SIZES;
use super::{DiskSizeTable, DriverContext, DriverFuture, HostDriver};
use crate::error::DriverError;
use crate::models::{Disk, Host, Storage};
use crate::task::Task;

/// Host type served by [`ScalewayHostDriver`].
pub const HOST_TYPE_SCALEWAY: &str = "scaleway";

/// Local NVMe volumes; they only resize while the server is stopped.
const LOCAL_VOLUME_TYPE: &str = "l_ssd";

/// Driver for Scaleway Instance hosts.
#[derive(Clone, Debug)]
pub struct ScalewayHostDriver {
    context: DriverContext,
}

impl ScalewayHostDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new(context: DriverContext) -> Self {
        Self { context }
    }
}

impl HostDriver for ScalewayHostDriver {
    fn host_type(&self) -> &'static str {
        HOST_TYPE_SCALEWAY
    }

    fn context(&self) -> &DriverContext {
        &self.context
    }

    fn disk_size_table(&self) -> &DiskSizeTable {
        &SCALEWAY_DISK_SIZES
    }

    fn request_resize_disk_on_host_online<'a>(
        &'a self,
        host: &'a Host,
        storage: &'a Storage,
        disk: &'a Disk,
        size_mb: u64,
        task: Task,
    ) -> DriverFuture<'a, ()> {
        if storage.storage_type == LOCAL_VOLUME_TYPE {
            return Box::pin(async {
                Err::<(), _>(DriverError::validation(
                    "l_ssd volumes cannot be resized while the server is running",
                ))
            });
        }
        self.request_resize_disk_on_host(host, storage, disk, size_mb, task)
    }
}
