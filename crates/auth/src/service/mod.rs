//! Use-cases composed from the hasher, token codec and repositories.

pub mod auth;
pub mod users;

pub use auth::{AuthError, AuthService, AuthSession, AuthSettings, Credentials, Registration};
pub use users::{UserService, UserServiceError};
