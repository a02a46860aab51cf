//! Mirror Airtable Links and Lists into a local SQLite cache.
//!
//! The crate is split the way the data flows: `airtable` talks to the remote
//! base, `auth` keeps the bearer credential fresh, `cache` owns the SQLite
//! mirror and `sync` reconciles the two. `actions` are the record operations
//! a launcher front end drives.

pub mod actions;
pub mod airtable;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
