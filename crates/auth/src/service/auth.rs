//! Registration and login.

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

use rolegate_core::{DomainError, FieldErrors};

use crate::{
    NewRole, NewUser, PasswordError, PasswordHasher, RegistrationStore, RepoError, RoleName, TokenCodec, User,
    UserRepository,
};

/// Description given to the default role when registration has to create it.
pub const DEFAULT_ROLE_DESCRIPTION: &str = "regular user";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("user already exists")]
    UserExists,

    /// Unknown user and wrong password are deliberately the same variant.
    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => AuthError::Validation(msg),
            DomainError::Conflict(_) => AuthError::UserExists,
            DomainError::Unauthorized => AuthError::InvalidCredentials,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

fn internal(err: impl core::fmt::Display) -> AuthError {
    AuthError::Internal(err.to_string())
}

#[derive(Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();
        errors.username("username", &self.username);
        errors.email("email", &self.email);
        errors.password("password", &self.password);
        errors.into_result()
    }
}

impl core::fmt::Debug for Registration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registration")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut errors = FieldErrors::new();
        errors.require("username", &self.username);
        errors.require("password", &self.password);
        errors.into_result()
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A freshly authenticated user and the token issued for it.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Role assigned to every new registration.
    pub default_role: RoleName,
    pub token_ttl: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            default_role: RoleName::USER,
            token_ttl: Duration::seconds(86_400),
        }
    }
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    registrations: Arc<dyn RegistrationStore>,
    hasher: Arc<PasswordHasher>,
    tokens: Arc<TokenCodec>,
    settings: AuthSettings,
    // Hash verified against when the username is unknown, so both login
    // failures cost one argon2 verification.
    decoy: Arc<OnceCell<String>>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        registrations: Arc<dyn RegistrationStore>,
        hasher: Arc<PasswordHasher>,
        tokens: Arc<TokenCodec>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            registrations,
            hasher,
            tokens,
            settings,
            decoy: Arc::new(OnceCell::new()),
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    async fn hash(&self, plaintext: String) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(internal)?
            .map_err(internal)
    }

    async fn verify(&self, plaintext: String, hash: String) -> Result<(), PasswordError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hash))
            .await
            .map_err(|e| PasswordError::Hash(e.to_string()))?
    }

    fn issue(&self, user: &User) -> Result<String, AuthError> {
        let role = user
            .role_name()
            .ok_or_else(|| AuthError::Internal(format!("role {} not loaded for user {}", user.role_id, user.id)))?;
        self.tokens
            .sign(user.id, role, self.settings.token_ttl)
            .map_err(internal)
    }

    /// Create a user with the default role and sign them in.
    ///
    /// The password is hashed before the transaction opens. The uniqueness
    /// pre-check, role resolution and insert share one transaction; a
    /// constraint violation on insert is still `UserExists`.
    #[instrument(skip(self, input), fields(username = %input.username), err)]
    pub async fn register(&self, input: Registration) -> Result<AuthSession, AuthError> {
        input.validate()?;
        let Registration {
            username,
            email,
            password,
        } = input;

        let password_hash = self.hash(password).await?;
        let mut tx = self.registrations.begin().await.map_err(internal)?;

        match tx.find_by_username_or_email(&username, &email).await {
            Ok(_) => return Err(AuthError::UserExists),
            Err(RepoError::NotFound) => {}
            Err(e) => return Err(internal(e)),
        }

        let role = match tx.find_role_by_name(&self.settings.default_role).await {
            Ok(role) => role,
            Err(RepoError::NotFound) => {
                info!(role = %self.settings.default_role, "creating missing default role");
                tx.create_role(NewRole::new(self.settings.default_role.clone(), DEFAULT_ROLE_DESCRIPTION))
                    .await
                    .map_err(internal)?
            }
            Err(e) => return Err(internal(e)),
        };

        let mut user = tx
            .create_user(NewUser {
                username,
                email,
                password_hash,
                role_id: role.id,
            })
            .await
            .map_err(|e| match e {
                RepoError::Conflict(_) => AuthError::UserExists,
                other => internal(other),
            })?;

        if user.role.is_none() {
            tx.load_role(&mut user).await.map_err(internal)?;
        }

        tx.commit().await.map_err(|e| match e {
            RepoError::Conflict(_) => AuthError::UserExists,
            other => internal(other),
        })?;

        let token = self.issue(&user)?;
        info!(user_id = %user.id, role = %role.name, "user registered");
        Ok(AuthSession { user, token })
    }

    /// Verify credentials and issue a token.
    ///
    /// Unknown usernames and wrong passwords both yield `InvalidCredentials`
    /// after the same amount of hashing work.
    #[instrument(skip(self, input), fields(username = %input.username), err)]
    pub async fn login(&self, input: Credentials) -> Result<AuthSession, AuthError> {
        input.validate()?;
        let Credentials { username, password } = input;

        let mut user = match self.users.find_by_username(&username).await {
            Ok(user) => user,
            Err(RepoError::NotFound) => {
                let decoy = self
                    .decoy
                    .get_or_try_init(|| self.hash("rolegate-decoy-password".to_string()))
                    .await?
                    .clone();
                let _ = self.verify(password, decoy).await;
                warn!("login failed");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(internal(e)),
        };

        match self.verify(password, user.password_hash.clone()).await {
            Ok(()) => {}
            Err(PasswordError::Mismatch) => {
                warn!("login failed");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(internal(e)),
        }

        if user.role.is_none() {
            self.users.load_role(&mut user).await.map_err(internal)?;
        }

        let token = self.issue(&user)?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthSession { user, token })
    }
}
