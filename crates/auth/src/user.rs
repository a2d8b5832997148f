//! User and role records.
//!
//! A `User` refers to its `Role` by id; the embedded `role` is only present
//! once a repository has eager-loaded it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use rolegate_core::{RoleId, UserId};

use crate::RoleName;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A role to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub name: RoleName,
    pub description: String,
}

impl NewRole {
    pub fn new(name: RoleName, description: impl Into<String>) -> Self {
        Self {
            name,
            description: description.into(),
        }
    }
}

/// User record.
///
/// # Invariants
/// - `username` and `email` are unique among live users.
/// - `password_hash` is never empty for a live user and never leaves the
///   process (it is redacted from `Debug` and not serializable).
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role_id: RoleId,
    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Name of the eager-loaded role, if any.
    pub fn role_name(&self) -> Option<&RoleName> {
        self.role.as_ref().map(|r| &r.name)
    }
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("role_id", &self.role_id)
            .field("role", &self.role)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("deleted_at", &self.deleted_at)
            .finish()
    }
}

/// A user to be persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role_id: RoleId,
}

impl core::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("role_id", &self.role_id)
            .finish_non_exhaustive()
    }
}

/// The mutable subset of a user.
///
/// Empty strings and a zero role id mean "leave unchanged"; see
/// [`UserPatch::normalized`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role_id: Option<RoleId>,
}

impl UserPatch {
    /// Collapse "empty" values into `None`.
    pub fn normalized(self) -> Self {
        Self {
            username: self.username.filter(|v| !v.is_empty()),
            email: self.email.filter(|v| !v.is_empty()),
            role_id: self.role_id.filter(|id| !id.is_unset()),
        }
    }

    /// Apply the patch in place. Returns `false` when the user already holds
    /// every patched value. A role change clears the now stale embedded role.
    pub fn apply_to(&self, user: &mut User) -> bool {
        let mut changed = false;
        if let Some(username) = self.username.as_ref().filter(|u| **u != user.username) {
            user.username = username.clone();
            changed = true;
        }
        if let Some(email) = self.email.as_ref().filter(|e| **e != user.email) {
            user.email = email.clone();
            changed = true;
        }
        if let Some(role_id) = self.role_id.filter(|r| *r != user.role_id) {
            user.role_id = role_id;
            user.role = None;
            changed = true;
        }
        changed
    }
}
