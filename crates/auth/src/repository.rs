//! Persistence contracts consumed by the auth and user services.
//!
//! Implementations live in `rolegate-infra` (Postgres and in-memory). Every
//! read only ever sees live (non soft-deleted) rows.

use async_trait::async_trait;
use thiserror::Error;

use rolegate_core::{RoleId, UserId};

use crate::{NewRole, NewUser, Role, RoleName, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    #[error("not found")]
    NotFound,

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> RepoResult<User>;

    /// Any live user matching either field. Only meant as a uniqueness
    /// pre-check; `NotFound` means "safe to create".
    async fn find_by_username_or_email(&self, username: &str, email: &str) -> RepoResult<User>;

    /// Every live user with its role populated.
    async fn find_all(&self) -> RepoResult<Vec<User>>;

    /// The live user with its role populated.
    async fn find_by_id(&self, id: UserId) -> RepoResult<User>;

    async fn create(&self, user: NewUser) -> RepoResult<User>;

    /// Persist every mutable field in one write. `NotFound` if the user is gone.
    async fn update(&self, user: &User) -> RepoResult<User>;

    /// Soft delete.
    async fn delete(&self, user: &User) -> RepoResult<()>;

    /// Populate `user.role` from `user.role_id`.
    async fn load_role(&self, user: &mut User) -> RepoResult<()>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn find_by_name(&self, name: &RoleName) -> RepoResult<Role>;

    async fn find_by_id(&self, id: RoleId) -> RepoResult<Role>;

    async fn create(&self, role: NewRole) -> RepoResult<Role>;
}

/// Opens the transactional scope registration runs in.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn begin(&self) -> RepoResult<Box<dyn RegistrationTx>>;
}

/// One registration unit of work.
///
/// Dropping the value without calling [`RegistrationTx::commit`] rolls back.
#[async_trait]
pub trait RegistrationTx: Send {
    async fn find_by_username_or_email(&mut self, username: &str, email: &str) -> RepoResult<User>;

    async fn find_role_by_name(&mut self, name: &RoleName) -> RepoResult<Role>;

    async fn create_role(&mut self, role: NewRole) -> RepoResult<Role>;

    async fn create_user(&mut self, user: NewUser) -> RepoResult<User>;

    async fn load_role(&mut self, user: &mut User) -> RepoResult<()>;

    async fn commit(self: Box<Self>) -> RepoResult<()>;
}
