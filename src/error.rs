// Typed failures for register/shift transitions
//
// Every rejected transition carries a human-readable reason that the front
// end can render as a form-level error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    /// Invariant violation (second open register/shift). Never retried.
    #[error("{0}")]
    Conflict(String),

    /// Referenced branch, register, shift or employee does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Lock-wait timeout or deadlock signaled by SQLite. Safe to retry.
    #[error("database is busy, please retry: {0}")]
    Transient(String),

    /// Malformed input (negative totals, conflicting close inputs).
    #[error("{0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(rusqlite::Error),
}

impl GuardError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        GuardError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        GuardError::NotFound(msg.into())
    }

    /// Only lock contention is worth retrying; conflicts are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Conflict(_) => "conflict",
            GuardError::NotFound(_) => "not_found",
            GuardError::Transient(_) => "transient",
            GuardError::Invalid(_) => "invalid",
            GuardError::Database(_) => "database",
        }
    }
}

impl From<rusqlite::Error> for GuardError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                GuardError::Transient(err.to_string())
            }
            _ => GuardError::Database(err),
        }
    }
}

pub type GuardResult<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_maps_to_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err: GuardError = busy.into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transient");
    }

    #[test]
    fn test_other_sqlite_errors_are_not_retryable() {
        let err: GuardError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "database");
    }

    #[test]
    fn test_conflict_message_is_surfaced_verbatim() {
        let err = GuardError::conflict("branch already has an open register");
        assert_eq!(err.to_string(), "branch already has an open register");
        assert!(!err.is_retryable());
    }
}
