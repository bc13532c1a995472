//! Flat `thiserror` error enum for the engine crate, in the style of
//! `tabs::TabsError` rather than the heavier `ErrorKind`/`define_error!`
//! split used by `logins`.

use etlify_interrupt_support::Interrupted;

#[derive(Debug, thiserror::Error)]
pub enum EtlifyError {
    #[error("no CRM registered under the name {0:?}")]
    UnknownCrm(String),

    #[error("no model binding registered for ({0:?}, {1:?})")]
    UnknownBinding(String, String),

    #[error("adapter error: {0}")]
    Adapter(#[from] crate::adapter::AdapterError),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("schema migration error: {0}")]
    Migration(#[from] etlify_sql_support::Error),

    #[error("payload serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("the operation was interrupted")]
    Interrupted(#[from] Interrupted),
}

pub type Result<T> = std::result::Result<T, EtlifyError>;

impl EtlifyError {
    /// Misconfiguration (spec.md §7): raised synchronously to the caller,
    /// never retried by the Job Layer.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            EtlifyError::UnknownCrm(_) | EtlifyError::UnknownBinding(_, _)
        )
    }
}
