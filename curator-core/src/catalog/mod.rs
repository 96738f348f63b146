//! Catalog integration: GraphQL client, query documents, response
//! normalization, and the entity cache.

pub mod cache;
pub mod client;
pub mod queries;
pub mod transform;

pub use cache::{CacheKeys, EntityCache};
pub use client::CatalogClient;
