//! Flat `thiserror` error enum for the Job Layer, in the same style as
//! `etlify-core::EtlifyError`.

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Engine(#[from] etlify_core::EtlifyError),

    #[error("operation interrupted")]
    Interrupted(#[from] etlify_interrupt_support::Interrupted),
}

pub type Result<T> = std::result::Result<T, ManagerError>;
