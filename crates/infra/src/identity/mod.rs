//! User and role persistence.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryIdentityStore, InMemoryRegistrationTx};
pub use postgres::{PgIdentityStore, PgRegistrationTx};
