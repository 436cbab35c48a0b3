use thiserror::Error;

/// Errors returned by kiosk-pay operations.
///
/// These are internal failures. Provider adapters never echo their text back
/// to the caller; they log it and answer with the provider's generic
/// internal-error code.
#[derive(Debug, Error)]
pub enum PayError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage call timed out after {0} ms")]
    Timeout(u64),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PayError {
    fn from(e: rusqlite::Error) -> Self {
        PayError::Storage(e.to_string())
    }
}

/// Returns true when a SQLite error is a constraint violation (PRIMARY KEY or UNIQUE).
#[cfg(feature = "sqlite")]
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
