//! The wire contract every reference adapter (`etlify-adapters::hubspot`,
//! `etlify-adapters::airtable`) implements, plus the tagged error/result
//! types that replace exception-based signaling (spec.md §9's "Exceptions
//! as signaling" re-architecture note).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A payload is a flat string-keyed map of JSON-serializable values, built
/// once per sync attempt by the caller-supplied serializer.
pub type Payload = HashMap<String, Value>;

/// Taxonomy surfaced by adapters (spec.md §4.3, §7). Distinct from
/// [`crate::synchronizer::AttemptOutcome`] — the Synchronizer is what
/// translates one into the other.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("transport error: {0}")]
    TransportError(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Two operations against a remote CRM. Implementations MUST be
/// idempotent on their own reads — a worker cancelled mid-attempt and a
/// subsequent retry are expected to both call `upsert` safely.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Find-or-create on the remote side. If `id_property` is `Some` and
    /// `payload` carries a non-null value for it, the adapter MUST first
    /// attempt a lookup by that value; on hit, patch the existing remote
    /// record; on miss, create. The `id_property` value MUST remain
    /// present in the created/patched record.
    async fn upsert(
        &self,
        payload: &Payload,
        id_property: Option<&str>,
        object_type: &str,
    ) -> AdapterResult<String>;

    /// `true` on a 2xx delete, `false` on 404 (already gone), an error
    /// otherwise.
    async fn delete(&self, crm_id: &str, object_type: &str) -> AdapterResult<bool>;
}
