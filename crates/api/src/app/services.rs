//! Composition root: builds every component once from configuration.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use rolegate_auth::{
    AuthService, AuthSettings, PasswordHasher, PolicyEngine, PolicyError, PolicyModel, PolicyStore,
    RegistrationStore, RepoError, RoleName, RoleRepository, TokenCodec, TokenError, UserRepository, UserService,
};
use rolegate_infra::config::{AppConfig, ConfigError, DatabaseConfig, StorageDriver};
use rolegate_infra::db::{self, DbError};
use rolegate_infra::identity::{InMemoryIdentityStore, PgIdentityStore};
use rolegate_infra::policy_store::{InMemoryPolicyStore, PgPolicyStore};
use rolegate_infra::{ensure_bootstrap_policy, ensure_bootstrap_roles};

/// Why the process could not start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("token codec: {0}")]
    Token(#[from] TokenError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] RepoError),
}

impl StartupError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Config(_)
            | StartupError::Token(_)
            | StartupError::Policy(PolicyError::Model(_) | PolicyError::Matcher(_)) => 2,
            StartupError::Database(DbError::Connect(_)) => 3,
            StartupError::Database(DbError::Migrate { .. }) => 4,
            StartupError::Policy(PolicyError::Store(_)) | StartupError::Bootstrap(_) => 1,
        }
    }
}

/// Shared, immutable-after-startup services handed to handlers.
#[derive(Clone)]
pub struct AppServices {
    pub auth: AuthService,
    pub users: UserService,
    pub policy: Arc<PolicyEngine>,
    pub tokens: Arc<TokenCodec>,
}

struct Stores {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    registrations: Arc<dyn RegistrationStore>,
    policy: Arc<dyn PolicyStore>,
}

async fn open_stores(config: &DatabaseConfig) -> Result<Stores, StartupError> {
    match config.driver {
        StorageDriver::Memory => {
            info!("using in-memory storage; state is lost on exit");
            let identity = Arc::new(InMemoryIdentityStore::new());
            Ok(Stores {
                users: identity.clone(),
                roles: identity.clone(),
                registrations: identity,
                policy: Arc::new(InMemoryPolicyStore::new()),
            })
        }
        StorageDriver::Postgres => {
            let pool = db::connect(config).await?;
            db::migrate(&pool).await?;
            let identity = Arc::new(PgIdentityStore::new(pool.clone()));
            Ok(Stores {
                users: identity.clone(),
                roles: identity.clone(),
                registrations: identity,
                policy: Arc::new(PgPolicyStore::new(pool)),
            })
        }
    }
}

/// Build services with the production password-hashing cost.
pub async fn build_services(config: &AppConfig) -> Result<AppServices, StartupError> {
    build_services_with(config, PasswordHasher::default()).await
}

#[instrument(skip_all, fields(driver = ?config.database.driver), err)]
pub async fn build_services_with(config: &AppConfig, hasher: PasswordHasher) -> Result<AppServices, StartupError> {
    config.validate()?;

    let tokens = Arc::new(TokenCodec::new(config.jwt.secret.as_bytes())?);
    let model = PolicyModel::from_config(&config.casbin.model_text()).await?;

    let stores = open_stores(&config.database).await?;
    ensure_bootstrap_roles(stores.roles.as_ref()).await?;

    let policy = Arc::new(PolicyEngine::new(model, stores.policy).await?);
    ensure_bootstrap_policy(&policy).await?;

    let settings = AuthSettings {
        default_role: RoleName::new(config.app.default_role.trim().to_string()),
        token_ttl: chrono::Duration::seconds(config.jwt.expiration_seconds),
    };
    let auth = AuthService::new(
        stores.users.clone(),
        stores.registrations,
        Arc::new(hasher),
        tokens.clone(),
        settings,
    );
    let users = UserService::new(stores.users, stores.roles);

    Ok(AppServices {
        auth,
        users,
        policy,
        tokens,
    })
}
