//! Host type to driver lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{AwsHostDriver, DriverContext, HostDriver, ScalewayHostDriver};
use crate::error::DriverError;

/// Immutable map from host type to its driver.
///
/// Built once at startup with [`DriverRegistry::builder`]; lookups never
/// mutate it.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<&'static str, Arc<dyn HostDriver>>,
}

impl DriverRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> DriverRegistryBuilder {
        DriverRegistryBuilder::default()
    }

    /// Registers the AWS and Scaleway drivers over a shared context.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] if two built-in drivers claim the
    /// same host type.
    pub fn with_builtin(context: &DriverContext) -> Result<Self, DriverError> {
        Ok(Self::builder()
            .register(Arc::new(AwsHostDriver::new(context.clone())))?
            .register(Arc::new(ScalewayHostDriver::new(context.clone())))?
            .build())
    }

    /// Returns the driver for `host_type`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::NotFound`] when no driver serves the type.
    pub fn get(&self, host_type: &str) -> Result<Arc<dyn HostDriver>, DriverError> {
        self.drivers
            .get(host_type)
            .cloned()
            .ok_or_else(|| DriverError::not_found("host driver", host_type))
    }

    /// Registered host types in sorted order.
    pub fn host_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.drivers.keys().copied()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.drivers.keys()).finish()
    }
}

/// Collects drivers before the registry is frozen.
#[derive(Default)]
pub struct DriverRegistryBuilder {
    drivers: BTreeMap<&'static str, Arc<dyn HostDriver>>,
}

impl DriverRegistryBuilder {
    /// Adds a driver.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Validation`] when another driver already
    /// serves the same host type.
    pub fn register(mut self, driver: Arc<dyn HostDriver>) -> Result<Self, DriverError> {
        let host_type = driver.host_type();
        if self.drivers.contains_key(host_type) {
            return Err(DriverError::validation(format!(
                "a host driver for '{host_type}' is already registered"
            )));
        }
        debug!(host_type, "host driver registered");
        self.drivers.insert(host_type, driver);
        Ok(self)
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> DriverRegistry {
        DriverRegistry {
            drivers: self.drivers,
        }
    }
}
