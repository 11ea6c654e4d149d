//! Scaleway implementation of the remote storage facade.
//!
//! Volumes and snapshots map onto Instance API volumes and snapshots. The
//! storage cache resolves marketplace images through `scaleway-rs`, turns
//! snapshots into images, and exports images to Object Storage.

mod error;
mod http;
mod image;
mod types;
mod volume;

use std::fmt;
use std::time::Duration;

use crate::config::ScalewayConfig;
use scaleway_rs::ScalewayApi;
use types::Zone;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(1800);

pub use error::ScalewayBackendError;
pub use image::ScalewayStorageCache;
pub use volume::ScalewayStorage;

/// Authenticated handle on the Scaleway APIs for one zone.
#[derive(Clone)]
pub struct ScalewayClient {
    api: ScalewayApi,
    config: ScalewayConfig,
    zone: Zone,
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl fmt::Debug for ScalewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScalewayClient")
            .field("zone", &self.zone.as_str())
            .field("project", &self.config.default_project_id)
            .finish_non_exhaustive()
    }
}

impl ScalewayClient {
    /// Constructs a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            zone: Zone::new(&config.default_zone),
            config,
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
        })
    }

    /// Overrides how often and how long provider tasks such as snapshot
    /// exports are polled.
    #[must_use]
    pub const fn with_polling(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.wait_timeout = wait_timeout;
        self
    }

    /// Configuration the client was built from.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }

    /// Storage creating volumes of `storage_type` (`b_ssd` or `l_ssd`).
    #[must_use]
    pub fn storage(&self, storage_type: impl Into<String>) -> ScalewayStorage {
        ScalewayStorage::new(self.clone(), storage_type.into())
    }

    /// Image cache of the configured zone.
    #[must_use]
    pub fn storage_cache(&self) -> ScalewayStorageCache {
        ScalewayStorageCache::new(self.clone())
    }

    /// Builds an authenticated request against a zoned Instance API path.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!(
            "{}{}",
            http::SCALEWAY_INSTANCE_API_BASE,
            self.zone.scope(path)
        );
        http::HTTP_CLIENT
            .request(method, url)
            .header("X-Auth-Token", &self.config.secret_key)
    }

    /// Tags in the `key=value` form Scaleway stores on resources.
    fn tags<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Vec<String> {
        pairs
            .into_iter()
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }
}

#[cfg(test)]
mod tests;
