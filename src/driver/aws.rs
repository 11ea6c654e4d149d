//! Amazon Web Services host driver.

use super::size::AWS_DISK_SIZES;
use super::{DiskSizeTable, DriverContext, HostDriver};

/// Host type served by [`AwsHostDriver`].
pub const HOST_TYPE_AWS: &str = "aws";

/// Driver for EBS-backed hosts. Uses the shared behaviour unchanged.
#[derive(Clone, Debug)]
pub struct AwsHostDriver {
    context: DriverContext,
}

impl AwsHostDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new(context: DriverContext) -> Self {
        Self { context }
    }
}

impl HostDriver for AwsHostDriver {
    fn host_type(&self) -> &'static str {
        HOST_TYPE_AWS
    }

    fn context(&self) -> &DriverContext {
        &self.context
    }

    fn disk_size_table(&self) -> &DiskSizeTable {
        &AWS_DISK_SIZES
    }
}
