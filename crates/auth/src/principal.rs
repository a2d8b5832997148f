use rolegate_core::UserId;

use crate::RoleName;

/// Identity of an authenticated caller, as established by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: RoleName,
}

impl Principal {
    pub fn new(user_id: UserId, role: RoleName) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}
