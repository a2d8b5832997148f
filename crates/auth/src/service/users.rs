//! User-record administration.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use rolegate_core::{DomainError, FieldErrors, UserId};

use crate::{Principal, RepoError, RoleRepository, User, UserPatch, UserRepository, can_update, effective_patch};

const TAKEN: &str = "username or email already in use";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UserServiceError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("user not found")]
    NotFound,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for UserServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound => UserServiceError::NotFound,
            RepoError::Conflict(_) => UserServiceError::Validation(TAKEN.into()),
            RepoError::Backend(msg) => UserServiceError::Internal(msg),
        }
    }
}

impl From<DomainError> for UserServiceError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => UserServiceError::Validation(msg),
            DomainError::NotFound => UserServiceError::NotFound,
            DomainError::Conflict(_) => UserServiceError::Validation(TAKEN.into()),
            DomainError::Unauthorized | DomainError::Forbidden => UserServiceError::PermissionDenied,
            DomainError::Internal(msg) => UserServiceError::Internal(msg),
        }
    }
}

#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, roles: Arc<dyn RoleRepository>) -> Self {
        Self { users, roles }
    }

    #[instrument(skip(self), err)]
    pub async fn list(&self) -> Result<Vec<User>, UserServiceError> {
        Ok(self.users.find_all().await?)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn get(&self, id: UserId) -> Result<User, UserServiceError> {
        Ok(self.users.find_by_id(id).await?)
    }

    /// Apply `patch` to `target` on behalf of `caller`.
    ///
    /// Allowed for the user themself or an admin. Only admins may change the
    /// role; for anyone else the role change is dropped and the rest applied.
    /// A patch that changes nothing returns the stored user without a write.
    /// A username or email held by another user is a validation error.
    #[instrument(skip(self, caller, patch), fields(user_id = %target, caller_id = %caller.user_id), err)]
    pub async fn update(&self, target: UserId, caller: &Principal, patch: UserPatch) -> Result<User, UserServiceError> {
        if !can_update(target, caller) {
            return Err(UserServiceError::PermissionDenied);
        }

        let patch = effective_patch(patch, caller);
        let mut errors = FieldErrors::new();
        errors.optional_username("username", patch.username.as_deref());
        errors.optional_email("email", patch.email.as_deref());
        errors.into_result()?;

        let mut user = self.users.find_by_id(target).await?;

        if let Some(role_id) = patch.role_id {
            match self.roles.find_by_id(role_id).await {
                Ok(_) => {}
                Err(RepoError::NotFound) => {
                    return Err(UserServiceError::Validation(format!(
                        "role_id {role_id} does not reference an existing role"
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !patch.apply_to(&mut user) {
            return Ok(user);
        }

        let mut updated = self.users.update(&user).await?;
        if updated.role.is_none() {
            self.users.load_role(&mut updated).await?;
        }

        info!("user updated");
        Ok(updated)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    pub async fn delete(&self, id: UserId) -> Result<(), UserServiceError> {
        let user = self.users.find_by_id(id).await?;
        self.users.delete(&user).await?;
        info!("user deleted");
        Ok(())
    }
}
