//! `rolegate-auth`: identity and access-control core.
//!
//! Password hashing, bearer token codec, the RBAC policy engine, persistence
//! contracts and the registration/login/user use-cases. This crate is
//! intentionally decoupled from HTTP and from any concrete storage backend.

pub mod authorize;
pub mod claims;
pub mod password;
pub mod policy;
pub mod principal;
pub mod repository;
pub mod roles;
pub mod service;
pub mod token;
pub mod user;

pub use authorize::{can_update, effective_patch};
pub use claims::{Claims, validate_claims};
pub use password::{PasswordError, PasswordHasher};
pub use policy::{
    AddOutcome, DEFAULT_MODEL, Decision, PolicyEngine, PolicyError, PolicyModel, PolicyRule, PolicySet, PolicyStore,
    RoleGrouping,
};
pub use principal::Principal;
pub use repository::{RegistrationStore, RegistrationTx, RepoError, RepoResult, RoleRepository, UserRepository};
pub use roles::RoleName;
pub use service::{
    AuthError, AuthService, AuthSession, AuthSettings, Credentials, Registration, UserService, UserServiceError,
};
pub use token::{TokenCodec, TokenError};
pub use user::{NewRole, NewUser, Role, User, UserPatch};
