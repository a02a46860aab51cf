//! Error types for linkmirror

use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias using linkmirror's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to Airtable or the local cache
#[derive(Error, Debug)]
pub enum Error {
  /// Connection or transport failure
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// Non-2xx response; fatal for the issuing call
  #[error("{operation} failed with HTTP {status}: {body}")]
  Status {
    operation: &'static str,
    status: u16,
    body: String,
  },

  /// Rejected before any network I/O
  #[error("Invalid input: {0}")]
  Validation(String),

  /// Credential acquisition failed
  #[error("Authentication failed: {0}")]
  Auth(#[from] AuthError),

  /// SQLite error
  #[error("Database error: {0}")]
  Database(#[from] rusqlite::Error),

  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Record or metadata key not found
  #[error("Not found: {0}")]
  NotFound(String),

  /// Invalid configuration
  #[error("Invalid configuration: {0}")]
  Config(String),

  /// A thread panicked while holding the cache connection
  #[error("Lock poisoned: {0}")]
  Lock(String),

  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// A fan-out unit stopped before delivering its result
  #[error("Sync was cancelled before all fetches completed")]
  Cancelled,
}
