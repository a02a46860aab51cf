pub mod api_types;
pub mod client;
pub mod rate_limit;
pub mod types;

pub use client::{AirtableClient, RemoteRecords};
pub use rate_limit::RateLimiter;
pub use types::{Collection, LinkRecord, ListRecord, ListStatus, NewLink, NewList, Vocabularies};
