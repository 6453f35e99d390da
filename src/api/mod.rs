//! Status feed client, domain types, and error taxonomy.

pub mod cache;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod types;
