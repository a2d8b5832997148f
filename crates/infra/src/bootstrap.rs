//! First-start seeding of the policy store and the well-known roles.

use tracing::{info, instrument};

use rolegate_auth::{
    AddOutcome, NewRole, PolicyEngine, PolicyError, PolicyRule, RepoError, RepoResult, RoleName, RoleRepository,
    service::auth::DEFAULT_ROLE_DESCRIPTION,
};

/// The rules every deployment starts from.
pub fn bootstrap_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule::new(RoleName::ADMIN.as_str(), "*", "*"),
        PolicyRule::new(RoleName::USER.as_str(), "/users/:id", "GET"),
        PolicyRule::new(RoleName::USER.as_str(), "/users/:id", "PUT"),
        PolicyRule::new(RoleName::ANONYMOUS.as_str(), "/auth/register", "POST"),
        PolicyRule::new(RoleName::ANONYMOUS.as_str(), "/auth/login", "POST"),
    ]
}

/// Seed the bootstrap rules into an engine that holds no rules yet.
///
/// A store with any rule is left untouched. Returns the number of rules added.
#[instrument(skip(engine), err)]
pub async fn ensure_bootstrap_policy(engine: &PolicyEngine) -> Result<usize, PolicyError> {
    if !engine.rules().is_empty() {
        return Ok(0);
    }

    let mut added = 0;
    for rule in bootstrap_rules() {
        if engine.has_rule(&rule) {
            continue;
        }
        if engine.add_rule(rule).await? == AddOutcome::Added {
            added += 1;
        }
    }

    if added > 0 {
        info!(added, "bootstrap policy seeded");
    }
    Ok(added)
}

/// Create the `admin`, `user` and `anonymous` roles when missing.
#[instrument(skip(roles), err)]
pub async fn ensure_bootstrap_roles(roles: &dyn RoleRepository) -> RepoResult<usize> {
    let wanted = [
        (RoleName::ADMIN, "administrator"),
        (RoleName::USER, DEFAULT_ROLE_DESCRIPTION),
        (RoleName::ANONYMOUS, "unauthenticated caller"),
    ];

    let mut created = 0;
    for (name, description) in wanted {
        match roles.find_by_name(&name).await {
            Ok(_) => continue,
            Err(RepoError::NotFound) => {}
            Err(e) => return Err(e),
        }
        match roles.create(NewRole::new(name.clone(), description)).await {
            Ok(_) => created += 1,
            // lost a race with another instance
            Err(RepoError::Conflict(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if created > 0 {
        info!(created, "bootstrap roles created");
    }
    Ok(created)
}
