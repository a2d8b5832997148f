//! Postgres-backed policy store over the `casbin_rule` table.
//!
//! Rows with `ptype = 'p'` hold rules in `v0..v2`; rows with `ptype = 'g'`
//! hold groupings as `(v0 = child, v1 = parent)`. Unused slots are `''`, so
//! the unique index over all columns also deduplicates.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};

use rolegate_auth::{AddOutcome, PolicyError, PolicyRule, PolicySet, PolicyStore, RoleGrouping};

use crate::db::map_policy_error;

const RULE: &str = "p";
const GROUPING: &str = "g";

#[derive(Debug, Clone)]
pub struct PgPolicyStore {
    pool: PgPool,
}

impl PgPolicyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, ptype: &str, v: [&str; 3]) -> Result<bool, PolicyError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM casbin_rule
                WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4
                  AND v3 = '' AND v4 = '' AND v5 = ''
            ) AS present
            "#,
        )
        .bind(ptype)
        .bind(v[0])
        .bind(v[1])
        .bind(v[2])
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_policy_error("exists", e))?;

        row.try_get("present")
            .map_err(|e| PolicyError::Store(format!("exists: {e}")))
    }

    async fn insert(&self, ptype: &str, v: [&str; 3]) -> Result<AddOutcome, PolicyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO casbin_rule (ptype, v0, v1, v2)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(ptype)
        .bind(v[0])
        .bind(v[1])
        .bind(v[2])
        .execute(&self.pool)
        .await
        .map_err(|e| map_policy_error("insert", e))?;

        Ok(if result.rows_affected() == 0 {
            AddOutcome::Duplicate
        } else {
            AddOutcome::Added
        })
    }

    async fn delete(&self, ptype: &str, v: [&str; 3]) -> Result<bool, PolicyError> {
        let result = sqlx::query(
            r#"
            DELETE FROM casbin_rule
            WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4
              AND v3 = '' AND v4 = '' AND v5 = ''
            "#,
        )
        .bind(ptype)
        .bind(v[0])
        .bind(v[1])
        .bind(v[2])
        .execute(&self.pool)
        .await
        .map_err(|e| map_policy_error("delete", e))?;

        Ok(result.rows_affected() > 0)
    }
}

fn rule_slots(rule: &PolicyRule) -> [&str; 3] {
    [rule.subject.as_str(), rule.object.as_str(), rule.action.as_str()]
}

fn grouping_slots(grouping: &RoleGrouping) -> [&str; 3] {
    [grouping.child.as_str(), grouping.parent.as_str(), ""]
}

#[async_trait]
impl PolicyStore for PgPolicyStore {
    #[instrument(skip(self), fields(rules, groupings), err)]
    async fn load(&self) -> Result<PolicySet, PolicyError> {
        let rows = sqlx::query("SELECT ptype, v0, v1, v2 FROM casbin_rule ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_policy_error("load", e))?;

        let mut set = PolicySet::default();
        for row in rows {
            let decode = |col: &str| -> Result<String, PolicyError> {
                row.try_get(col)
                    .map_err(|e| PolicyError::Store(format!("load: column {col}: {e}")))
            };
            match decode("ptype")?.as_str() {
                RULE => set
                    .rules
                    .push(PolicyRule::new(decode("v0")?, decode("v1")?, decode("v2")?)),
                GROUPING => set.groupings.push(RoleGrouping::new(decode("v0")?, decode("v1")?)),
                other => tracing::warn!(ptype = other, "ignoring unknown policy row type"),
            }
        }

        let span = Span::current();
        span.record("rules", set.rules.len());
        span.record("groupings", set.groupings.len());
        Ok(set)
    }

    async fn has_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
        self.exists(RULE, rule_slots(rule)).await
    }

    #[instrument(skip(self), fields(rule = %rule), err)]
    async fn add_rule(&self, rule: &PolicyRule) -> Result<AddOutcome, PolicyError> {
        self.insert(RULE, rule_slots(rule)).await
    }

    #[instrument(skip(self), fields(rule = %rule), err)]
    async fn remove_rule(&self, rule: &PolicyRule) -> Result<bool, PolicyError> {
        self.delete(RULE, rule_slots(rule)).await
    }

    async fn has_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
        self.exists(GROUPING, grouping_slots(grouping)).await
    }

    #[instrument(skip(self), fields(grouping = %grouping), err)]
    async fn add_grouping(&self, grouping: &RoleGrouping) -> Result<AddOutcome, PolicyError> {
        self.insert(GROUPING, grouping_slots(grouping)).await
    }

    #[instrument(skip(self), fields(grouping = %grouping), err)]
    async fn remove_grouping(&self, grouping: &RoleGrouping) -> Result<bool, PolicyError> {
        self.delete(GROUPING, grouping_slots(grouping)).await
    }
}
