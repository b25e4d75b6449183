//! Persistence collaborators for the authorization core.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryAuthzStore;
pub use postgres::PostgresAuthzStore;
