//! Infrastructure layer: configuration, database, storage adapters.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod identity;
pub mod policy_store;


pub use bootstrap::{bootstrap_rules, ensure_bootstrap_policy, ensure_bootstrap_roles};
