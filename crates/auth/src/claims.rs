use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use rolegate_core::UserId;

use crate::{Principal, RoleName, TokenError};

/// Claim set carried by a bearer token.
///
/// Timestamps are Unix seconds (the JWT `NumericDate` convention).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: UserId,

    /// Role name at the time of issuance.
    pub role: RoleName,

    pub iat: i64,

    pub exp: i64,
}

impl Claims {
    /// Claims valid for `ttl` starting at `issued_at`. A non-positive `ttl`
    /// yields claims that are already expired.
    pub fn new(sub: UserId, role: RoleName, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.timestamp();
        Self {
            sub,
            role,
            iat,
            exp: iat.saturating_add(ttl.num_seconds()),
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.sub, self.role.clone())
    }
}

/// Deterministically validate claims against `now`.
///
/// A token is only accepted while `exp` is strictly greater than `now`
/// (widened by `leeway`). Signature verification happens in
/// [`crate::TokenCodec`]; this checks the time window only.
pub fn validate_claims(claims: &Claims, now: DateTime<Utc>, leeway: Duration) -> Result<(), TokenError> {
    let now = now.timestamp();
    let leeway = leeway.num_seconds().max(0);

    if claims.exp.saturating_add(leeway) <= now {
        return Err(TokenError::Expired);
    }
    if claims.iat > now.saturating_add(leeway) {
        return Err(TokenError::Malformed("token issued in the future".into()));
    }
    if claims.exp <= claims.iat {
        return Err(TokenError::Malformed("expiry precedes issuance".into()));
    }
    Ok(())
}
