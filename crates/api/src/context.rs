use rolegate_auth::{Principal, RoleName};
use rolegate_core::UserId;

/// Authenticated caller for a request.
///
/// Attached by the credential stage; absent on public routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn role(&self) -> &RoleName {
        &self.principal.role
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

/// Correlation id echoed in `x-request-id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
