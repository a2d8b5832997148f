//! Postgres-backed user and role repositories.
//!
//! Every user read joins its role, so the role comes back eager-loaded.
//! Soft-deleted rows (`deleted_at IS NOT NULL`) are invisible to all reads.
//!
//! ## Error Mapping
//!
//! | SQLx error | RepoError |
//! |---|---|
//! | unique violation (`23505`) | `Conflict` |
//! | no row where one is required | `NotFound` |
//! | anything else | `Backend` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use rolegate_auth::{
    NewRole, NewUser, RegistrationStore, RegistrationTx, RepoError, RepoResult, Role, RoleName, RoleRepository,
    User, UserRepository,
};
use rolegate_core::{RoleId, UserId};

use crate::db::{map_repo_error, to_i64, to_u64};

const USER_SELECT: &str = r#"
    SELECT
        u.id, u.username, u.email, u.password, u.role_id,
        u.created_at, u.updated_at, u.deleted_at,
        r.id AS r_id, r.name AS r_name, r.description AS r_description,
        r.created_at AS r_created_at, r.updated_at AS r_updated_at
    FROM users u
    LEFT JOIN roles r ON r.id = u.role_id AND r.deleted_at IS NULL
"#;

const ROLE_SELECT: &str = "SELECT id, name, description, created_at, updated_at FROM roles";

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let role_id: Option<i64> = row.try_get("r_id")?;
    let role = match role_id {
        Some(id) => Some(Role {
            id: RoleId::new(to_u64(id)?),
            name: RoleName::from(row.try_get::<String, _>("r_name")?),
            description: row.try_get("r_description")?,
            created_at: row.try_get("r_created_at")?,
            updated_at: row.try_get("r_updated_at")?,
        }),
        None => None,
    };

    Ok(User {
        id: UserId::new(to_u64(row.try_get("id")?)?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password")?,
        role_id: RoleId::new(to_u64(row.try_get("role_id")?)?),
        role,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: RoleId::new(to_u64(row.try_get("id")?)?),
        name: RoleName::from(row.try_get::<String, _>("name")?),
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode<T>(operation: &str, row: Option<PgRow>, f: fn(&PgRow) -> Result<T, sqlx::Error>) -> RepoResult<T> {
    let row = row.ok_or(RepoError::NotFound)?;
    f(&row).map_err(|e| RepoError::Backend(format!("failed to decode row in {operation}: {e}")))
}

async fn select_user_by_username<'e>(exec: impl PgExecutor<'e>, username: &str) -> RepoResult<User> {
    let row = sqlx::query(&format!("{USER_SELECT} WHERE u.username = $1 AND u.deleted_at IS NULL"))
        .bind(username)
        .fetch_optional(exec)
        .await
        .map_err(|e| map_repo_error("find_by_username", e))?;
    decode("find_by_username", row, user_from_row)
}

async fn select_user_by_username_or_email<'e>(
    exec: impl PgExecutor<'e>,
    username: &str,
    email: &str,
) -> RepoResult<User> {
    let row = sqlx::query(&format!(
        "{USER_SELECT} WHERE (u.username = $1 OR u.email = $2) AND u.deleted_at IS NULL ORDER BY u.id LIMIT 1"
    ))
    .bind(username)
    .bind(email)
    .fetch_optional(exec)
    .await
    .map_err(|e| map_repo_error("find_by_username_or_email", e))?;
    decode("find_by_username_or_email", row, user_from_row)
}

async fn select_role_by_name<'e>(exec: impl PgExecutor<'e>, name: &RoleName) -> RepoResult<Role> {
    let row = sqlx::query(&format!("{ROLE_SELECT} WHERE name = $1 AND deleted_at IS NULL"))
        .bind(name.as_str())
        .fetch_optional(exec)
        .await
        .map_err(|e| map_repo_error("find_role_by_name", e))?;
    decode("find_role_by_name", row, role_from_row)
}

async fn select_role_by_id<'e>(exec: impl PgExecutor<'e>, id: RoleId) -> RepoResult<Role> {
    let row = sqlx::query(&format!("{ROLE_SELECT} WHERE id = $1 AND deleted_at IS NULL"))
        .bind(to_i64(id.get()))
        .fetch_optional(exec)
        .await
        .map_err(|e| map_repo_error("find_role_by_id", e))?;
    decode("find_role_by_id", row, role_from_row)
}

async fn insert_user<'e>(exec: impl PgExecutor<'e>, user: NewUser) -> RepoResult<User> {
    let row = sqlx::query(
        r#"
        INSERT INTO users (username, email, password, role_id)
        VALUES ($1, $2, $3, $4)
        RETURNING id, created_at, updated_at
        "#,
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(to_i64(user.role_id.get()))
    .fetch_one(exec)
    .await
    .map_err(|e| map_repo_error("create_user", e))?;

    let id = row
        .try_get::<i64, _>("id")
        .and_then(to_u64)
        .map_err(|e| RepoError::Backend(format!("create_user: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| RepoError::Backend(format!("create_user: {e}")))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| RepoError::Backend(format!("create_user: {e}")))?;

    Ok(User {
        id: UserId::new(id),
        username: user.username,
        email: user.email,
        password_hash: user.password_hash,
        role_id: user.role_id,
        role: None,
        created_at,
        updated_at,
        deleted_at: None,
    })
}

async fn insert_role<'e>(exec: impl PgExecutor<'e>, role: NewRole) -> RepoResult<Role> {
    let row = sqlx::query(
        r#"
        INSERT INTO roles (name, description)
        VALUES ($1, $2)
        RETURNING id, name, description, created_at, updated_at
        "#,
    )
    .bind(role.name.as_str())
    .bind(&role.description)
    .fetch_optional(exec)
    .await
    .map_err(|e| map_repo_error("create_role", e))?;
    decode("create_role", row, role_from_row)
}

/// User and role repositories plus the registration transaction over one pool.
#[derive(Debug, Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgIdentityStore {
    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> RepoResult<User> {
        select_user_by_username(&self.pool, username).await
    }

    #[instrument(skip(self), err)]
    async fn find_by_username_or_email(&self, username: &str, email: &str) -> RepoResult<User> {
        select_user_by_username_or_email(&self.pool, username, email).await
    }

    #[instrument(skip(self), fields(user_count), err)]
    async fn find_all(&self) -> RepoResult<Vec<User>> {
        let rows = sqlx::query(&format!("{USER_SELECT} WHERE u.deleted_at IS NULL ORDER BY u.id ASC"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_repo_error("find_all", e))?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            users.push(decode("find_all", Some(row), user_from_row)?);
        }

        Span::current().record("user_count", users.len());
        Ok(users)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_by_id(&self, id: UserId) -> RepoResult<User> {
        let row = sqlx::query(&format!("{USER_SELECT} WHERE u.id = $1 AND u.deleted_at IS NULL"))
            .bind(to_i64(id.get()))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_repo_error("find_by_id", e))?;
        decode("find_by_id", row, user_from_row)
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn create(&self, user: NewUser) -> RepoResult<User> {
        insert_user(&self.pool, user).await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn update(&self, user: &User) -> RepoResult<User> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, password = $4, role_id = $5, updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING updated_at
            "#,
        )
        .bind(to_i64(user.id.get()))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(to_i64(user.role_id.get()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_repo_error("update_user", e))?
        .ok_or(RepoError::NotFound)?;

        let mut updated = user.clone();
        updated.updated_at = row
            .try_get("updated_at")
            .map_err(|e| RepoError::Backend(format!("update_user: {e}")))?;
        if updated.role.as_ref().is_some_and(|r| r.id != updated.role_id) {
            updated.role = None;
        }
        Ok(updated)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn delete(&self, user: &User) -> RepoResult<()> {
        let result = sqlx::query("UPDATE users SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(to_i64(user.id.get()))
            .execute(&self.pool)
            .await
            .map_err(|e| map_repo_error("delete_user", e))?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn load_role(&self, user: &mut User) -> RepoResult<()> {
        user.role = Some(select_role_by_id(&self.pool, user.role_id).await?);
        Ok(())
    }
}

#[async_trait]
impl RoleRepository for PgIdentityStore {
    #[instrument(skip(self), fields(role = %name), err)]
    async fn find_by_name(&self, name: &RoleName) -> RepoResult<Role> {
        select_role_by_name(&self.pool, name).await
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn find_by_id(&self, id: RoleId) -> RepoResult<Role> {
        select_role_by_id(&self.pool, id).await
    }

    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn create(&self, role: NewRole) -> RepoResult<Role> {
        insert_role(&self.pool, role).await
    }
}

#[async_trait]
impl RegistrationStore for PgIdentityStore {
    async fn begin(&self) -> RepoResult<Box<dyn RegistrationTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_repo_error("begin_registration", e))?;
        Ok(Box::new(PgRegistrationTx { tx }))
    }
}

/// One registration inside a database transaction. Rolled back on drop.
pub struct PgRegistrationTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RegistrationTx for PgRegistrationTx {
    async fn find_by_username_or_email(&mut self, username: &str, email: &str) -> RepoResult<User> {
        select_user_by_username_or_email(&mut *self.tx, username, email).await
    }

    async fn find_role_by_name(&mut self, name: &RoleName) -> RepoResult<Role> {
        select_role_by_name(&mut *self.tx, name).await
    }

    /// A concurrent registration may create the same role first; in that case
    /// the committed row is returned instead of aborting the transaction.
    async fn create_role(&mut self, role: NewRole) -> RepoResult<Role> {
        let row = sqlx::query(
            r#"
            INSERT INTO roles (name, description)
            VALUES ($1, $2)
            ON CONFLICT (name) WHERE deleted_at IS NULL DO NOTHING
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(role.name.as_str())
        .bind(&role.description)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_repo_error("create_role", e))?;

        match row {
            Some(row) => decode("create_role", Some(row), role_from_row),
            None => select_role_by_name(&mut *self.tx, &role.name).await,
        }
    }

    async fn create_user(&mut self, user: NewUser) -> RepoResult<User> {
        insert_user(&mut *self.tx, user).await
    }

    async fn load_role(&mut self, user: &mut User) -> RepoResult<()> {
        user.role = Some(select_role_by_id(&mut *self.tx, user.role_id).await?);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> RepoResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_repo_error("commit_registration", e))
    }
}
