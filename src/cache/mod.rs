//! Local mirror of the remote base.
//!
//! Links and Lists are stored as normalized rows with a membership table
//! between them; everything else (sync watermark, select vocabularies,
//! credentials) lives in a flat key/value Metadata table.

mod store;

pub use store::CacheStore;

/// Restricts a query to a single List
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListFilter {
  ById(String),
  ByTitle(String),
}

/// Metadata keys
pub mod keys {
  /// RFC3339 lower bound for changed-since queries
  pub const LAST_SYNCED_AT: &str = "lastSyncedAt";
  /// JSON array of the Tags vocabulary
  pub const TAGS: &str = "Tags";
  /// JSON array of the Category vocabulary
  pub const CATEGORIES: &str = "Categories";
  pub const ACCESS_TOKEN: &str = "AccessToken";
  /// Unix seconds
  pub const ACCESS_EXPIRY: &str = "Expiry";
  pub const REFRESH_TOKEN: &str = "RefreshToken";
  /// Unix seconds
  pub const REFRESH_EXPIRY: &str = "RefreshExpiry";
}
