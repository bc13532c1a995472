//! Status-code-to-`AdapterError` mapping shared by both reference adapters
//! (spec.md §4.3: "Error taxonomy surfaced by adapters").

use etlify_core::AdapterError;
use reqwest::StatusCode;

/// Maps a non-2xx response into the tagged error taxonomy. `body` is the
/// response text, already read by the caller (reqwest consumes the body on
/// read, so this can't be done lazily inside the match).
pub(crate) fn map_status_error(status: StatusCode, body: &str) -> AdapterError {
    match status.as_u16() {
        401 | 403 => AdapterError::Unauthorized(body.to_string()),
        404 => AdapterError::NotFound(body.to_string()),
        409 | 422 => AdapterError::ValidationFailed(body.to_string()),
        429 => AdapterError::RateLimited {
            retry_after_secs: None,
        },
        other => AdapterError::ApiError {
            status: other,
            message: body.to_string(),
        },
    }
}

/// Reads the `Retry-After` header (seconds form only) off a 429 response.
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// A transport-level failure (DNS, TLS, timeout, connection reset) never
/// carries a response to classify, so it always maps to `TransportError`.
pub(crate) fn map_transport_error(err: reqwest::Error) -> AdapterError {
    AdapterError::TransportError(err.to_string())
}
