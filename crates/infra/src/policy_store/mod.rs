//! Durable storage for policy rules and role groupings.

mod in_memory;
mod postgres;

pub use in_memory::InMemoryPolicyStore;
pub use postgres::PgPolicyStore;
