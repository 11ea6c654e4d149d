//! Disk size bounds per storage class.

use crate::error::DriverError;

/// Inclusive size bounds, in GiB, for one storage class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskSizeRange {
    /// Storage class the bounds apply to.
    pub storage_type: &'static str,
    /// Smallest accepted size.
    pub min_gb: u64,
    /// Largest accepted size.
    pub max_gb: u64,
}

impl DiskSizeRange {
    const fn new(storage_type: &'static str, min_gb: u64, max_gb: u64) -> Self {
        Self {
            storage_type,
            min_gb,
            max_gb,
        }
    }

    /// Returns `true` when `size_gb` lies within the bounds.
    #[must_use]
    pub const fn contains(&self, size_gb: u64) -> bool {
        size_gb >= self.min_gb && size_gb <= self.max_gb
    }
}

/// Table of accepted disk sizes, one row per storage class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DiskSizeTable {
    ranges: &'static [DiskSizeRange],
}

impl DiskSizeTable {
    /// Wraps a static list of rows.
    #[must_use]
    pub const fn new(ranges: &'static [DiskSizeRange]) -> Self {
        Self { ranges }
    }

    /// Returns the row for `storage_type`.
    #[must_use]
    pub fn lookup(&self, storage_type: &str) -> Option<&DiskSizeRange> {
        self.ranges
            .iter()
            .find(|range| range.storage_type == storage_type)
    }

    /// Storage classes known to the table.
    pub fn storage_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ranges.iter().map(|range| range.storage_type)
    }

    /// Checks `size_gb` against the row for `storage_type`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] for unknown storage classes and
    /// sizes outside the inclusive bounds.
    pub fn validate(&self, storage_type: &str, size_gb: u64) -> Result<(), DriverError> {
        let range = self.lookup(storage_type).ok_or_else(|| {
            DriverError::validation(format!("storage type '{storage_type}' is not supported"))
        })?;
        if range.contains(size_gb) {
            return Ok(());
        }
        Err(DriverError::validation(format!(
            "the {storage_type} disk size must be in the range of {}GB ~ {}GB, got {size_gb}GB",
            range.min_gb, range.max_gb
        )))
    }
}

/// EBS volume classes.
pub const AWS_DISK_SIZES: DiskSizeTable = DiskSizeTable::new(&[
    DiskSizeRange::new("gp2", 1, 16_384),
    DiskSizeRange::new("io1", 4, 16_384),
    DiskSizeRange::new("st1", 500, 16_384),
    DiskSizeRange::new("sc1", 500, 16_384),
    DiskSizeRange::new("standard", 1, 1_024),
]);

/// Scaleway Instance volume classes.
pub const SCALEWAY_DISK_SIZES: DiskSizeTable = DiskSizeTable::new(&[
    DiskSizeRange::new("l_ssd", 1, 800),
    DiskSizeRange::new("b_ssd", 1, 10_000),
]);

/// Converts a size in MiB to whole GiB, rounding up.
#[must_use]
pub const fn mb_to_gb(size_mb: u64) -> u64 {
    size_mb.div_ceil(1024)
}

/// Converts whole GiB to MiB, saturating on overflow.
#[must_use]
pub const fn gb_to_mb(size_gb: u64) -> u64 {
    size_gb.saturating_mul(1024)
}
