//! Error types
//!
//! A single error enum for the library. Binary code wraps these in `anyhow`.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AuthStateError>;

#[derive(Debug, Error)]
pub enum AuthStateError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Pool creation or schema creation failed. The pool manager stays
    /// uninitialized so the caller can try again.
    #[error("Failed to initialize pool: {0}")]
    PoolInit(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed binary value: {0}")]
    MalformedBinary(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Admission gate rejected the statement (connection limit + queue limit reached).
    #[error("Query queue is full ({limit} statements in flight)")]
    QueueFull { limit: usize },

    #[error("Query failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_error_converts() {
        let err: AuthStateError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AuthStateError::Database(_)));
    }

    #[test]
    fn test_display_retries_exhausted() {
        let err = AuthStateError::RetriesExhausted {
            attempts: 3,
            last_error: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Query failed after 3 attempt(s): connection refused"
        );
    }
}
