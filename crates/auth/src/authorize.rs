//! Record-level authorization for user mutations.
//!
//! Route-level access is the policy engine's job; these predicates guard what
//! a caller may do to a *specific* user record once the route is allowed.
//!
//! - No IO
//! - No panics

use rolegate_core::UserId;

use crate::{Principal, UserPatch};

/// A caller may update a user record iff it is their own or they are admin.
pub fn can_update(target: UserId, caller: &Principal) -> bool {
    target == caller.user_id || caller.is_admin()
}

/// Restrict a patch to what `caller` may change.
///
/// The patch is normalized first (empty values mean "unchanged"); a role
/// change survives only for admins and is silently dropped otherwise.
pub fn effective_patch(patch: UserPatch, caller: &Principal) -> UserPatch {
    let mut patch = patch.normalized();
    if !caller.is_admin() {
        patch.role_id = None;
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoleName;
    use proptest::prelude::*;
    use rolegate_core::RoleId;

    proptest! {
        #[test]
        fn update_allowed_iff_self_or_admin(
            target in 1u64..50,
            caller in 1u64..50,
            role in prop_oneof![Just("admin"), Just("user"), Just("anonymous"), Just("auditor")],
        ) {
            let principal = Principal::new(UserId::new(caller), RoleName::from(role));
            prop_assert_eq!(
                can_update(UserId::new(target), &principal),
                target == caller || role == "admin"
            );
        }

        #[test]
        fn role_change_survives_only_for_admin(
            role in prop_oneof![Just("admin"), Just("user"), Just("manager")],
            new_role in 1u64..10,
        ) {
            let principal = Principal::new(UserId::new(1), RoleName::from(role));
            let patch = UserPatch {
                username: Some("renamed".into()),
                role_id: Some(RoleId::new(new_role)),
                ..Default::default()
            };
            let effective = effective_patch(patch, &principal);
            prop_assert_eq!(effective.username.as_deref(), Some("renamed"));
            prop_assert_eq!(effective.role_id.is_some(), role == "admin");
        }
    }
}
