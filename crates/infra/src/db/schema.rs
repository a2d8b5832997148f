//! Schema steps, applied in order inside one transaction.
//!
//! Uniqueness only binds live rows, so a soft-deleted user's username and
//! email can be registered again.

pub(super) const STEPS: &[(&str, &str)] = &[
    (
        "roles",
        r#"
        CREATE TABLE IF NOT EXISTS roles (
            id          BIGSERIAL PRIMARY KEY,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at  TIMESTAMPTZ NULL,
            name        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT ''
        )
        "#,
    ),
    (
        "roles_name_unique",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_roles_name ON roles (name) WHERE deleted_at IS NULL",
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id          BIGSERIAL PRIMARY KEY,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            deleted_at  TIMESTAMPTZ NULL,
            username    TEXT NOT NULL,
            email       TEXT NOT NULL,
            password    TEXT NOT NULL CHECK (password <> ''),
            role_id     BIGINT NOT NULL REFERENCES roles (id)
        )
        "#,
    ),
    (
        "users_username_unique",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users (username) WHERE deleted_at IS NULL",
    ),
    (
        "users_email_unique",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users (email) WHERE deleted_at IS NULL",
    ),
    (
        "users_deleted_at",
        "CREATE INDEX IF NOT EXISTS idx_users_deleted_at ON users (deleted_at)",
    ),
    (
        "casbin_rule",
        r#"
        CREATE TABLE IF NOT EXISTS casbin_rule (
            id    BIGSERIAL PRIMARY KEY,
            ptype VARCHAR(100) NOT NULL,
            v0    VARCHAR(100) NOT NULL DEFAULT '',
            v1    VARCHAR(100) NOT NULL DEFAULT '',
            v2    VARCHAR(100) NOT NULL DEFAULT '',
            v3    VARCHAR(100) NOT NULL DEFAULT '',
            v4    VARCHAR(100) NOT NULL DEFAULT '',
            v5    VARCHAR(100) NOT NULL DEFAULT ''
        )
        "#,
    ),
    (
        "casbin_rule_unique",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_casbin_rule ON casbin_rule (ptype, v0, v1, v2, v3, v4, v5)",
    ),
];
