//! Infrastructure layer: storage backends and the org-lookup cache.

pub mod cache;
pub mod store;

pub use cache::{CachedStore, OrgCache, OrgCacheConfig};
pub use store::{InMemoryAuthzStore, PostgresAuthzStore};

#[cfg(test)]
mod integration_tests;
