//! Raw calls against the Instance API for endpoints `scaleway-rs` does not
//! cover (volumes, snapshots, image creation and exports).

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::remote::RemoteError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub(super) const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

pub(super) static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Describes one call for logging and error mapping.
#[derive(Clone, Copy, Debug)]
pub(super) struct Call<'a> {
    /// Facade operation name used in error messages.
    pub(super) operation: &'static str,
    /// Resource kind reported when the provider answers 404.
    pub(super) kind: &'static str,
    /// Identifier of the addressed resource.
    pub(super) id: &'a str,
}

impl<'a> Call<'a> {
    pub(super) const fn new(operation: &'static str, kind: &'static str, id: &'a str) -> Self {
        Self {
            operation,
            kind,
            id,
        }
    }
}

/// Sends `request` and returns the response body.
///
/// A 404 maps to [`RemoteError::NotFound`]; any other non-success status
/// or transport failure maps to [`RemoteError::Operation`].
pub(super) async fn execute(
    request: reqwest::RequestBuilder,
    call: Call<'_>,
) -> Result<Vec<u8>, RemoteError> {
    let response = request
        .send()
        .await
        .map_err(|err| RemoteError::operation(call.operation, err))?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|err| RemoteError::operation(call.operation, err))?;

    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::not_found(call.kind, call.id));
    }
    if !status.is_success() {
        let message = String::from_utf8_lossy(&body).into_owned();
        return Err(RemoteError::operation(
            call.operation,
            format!("HTTP {status}: {message}"),
        ));
    }
    debug!(operation = call.operation, id = call.id, %status, "scaleway call succeeded");
    Ok(body.to_vec())
}

/// Sends `request` and decodes the JSON response body.
pub(super) async fn execute_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    call: Call<'_>,
) -> Result<T, RemoteError> {
    let body = execute(request, call).await?;
    decode(&body, call.operation)
}

pub(super) fn decode<T: DeserializeOwned>(body: &[u8], operation: &str) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|err| RemoteError::operation(operation, err))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Envelope {
        volume: Inner,
    }

    #[derive(Debug, Deserialize)]
    struct Inner {
        id: String,
    }

    #[test]
    fn decode_reads_envelopes() {
        let parsed: Envelope =
            decode(br#"{"volume":{"id":"vol-1","extra":true}}"#, "get_volume").expect("decoded");
        assert_eq!(parsed.volume.id, "vol-1");
    }

    #[test]
    fn decode_errors_name_the_operation() {
        let err = decode::<Envelope>(b"not json", "get_volume").expect_err("invalid body");
        assert!(err.to_string().starts_with("get_volume failed:"), "{err}");
    }
}
