use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollSignalError {
    /// Two observations share a fingerprint but disagree on core identity
    /// fields. Never resolved silently.
    #[error("DUPLICATE_CONFLICT core fields mismatch: {0}")]
    DuplicateConflict(String),

    #[error("Audience scope conflict: {0}")]
    ScopeConflict(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
