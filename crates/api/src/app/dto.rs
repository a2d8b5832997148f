use axum::{Json, extract::rejection::JsonRejection};
use serde::{Deserialize, Serialize};

use rolegate_auth::{Credentials, Registration, User, UserPatch};
use rolegate_core::{RoleId, UserId};

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl From<RegisterRequest> for Registration {
    fn from(value: RegisterRequest) -> Self {
        Registration {
            username: value.username,
            email: value.email,
            password: value.password,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl From<LoginRequest> for Credentials {
    fn from(value: LoginRequest) -> Self {
        Credentials {
            username: value.username,
            password: value.password,
        }
    }
}

/// Only these three fields are patchable; anything else in the body is ignored.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role_id: Option<RoleId>,
}

impl From<UpdateUserRequest> for UserPatch {
    fn from(value: UpdateUserRequest) -> Self {
        UserPatch {
            username: value.username,
            email: value.email,
            role_id: value.role_id,
        }
    }
}

/// Unwrap a JSON body, turning extractor rejections into validation errors.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::validation(rejection.body_text()))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse::<UserId>().map_err(ApiError::from)
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role_id: RoleId,
    /// Role name; empty when the role could not be loaded.
    pub role: String,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role_id: user.role_id,
            role: user.role_name().map(|r| r.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rolegate_auth::{Role, RoleName};

    use super::*;

    #[test]
    fn user_response_flattens_role_and_omits_password() {
        let now = Utc::now();
        let user = User {
            id: UserId::new(7),
            username: "alice".into(),
            email: "a@x".into(),
            password_hash: "$argon2id$secret".into(),
            role_id: RoleId::new(2),
            role: Some(Role {
                id: RoleId::new(2),
                name: RoleName::USER,
                description: "regular user".into(),
                created_at: now,
                updated_at: now,
            }),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let json = serde_json::to_value(UserResponse::from(&user)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "username": "alice", "email": "a@x", "role_id": 2, "role": "user"})
        );
        assert!(!json.to_string().contains("argon2"));
    }

    #[test]
    fn update_request_ignores_unknown_fields() {
        let req: UpdateUserRequest =
            serde_json::from_str(r#"{"email":"b@x","password":"hijack","deleted_at":null,"role_id":3}"#).unwrap();
        let patch = UserPatch::from(req);
        assert_eq!(patch.email.as_deref(), Some("b@x"));
        assert_eq!(patch.role_id, Some(RoleId::new(3)));
        assert!(patch.username.is_none());
    }

    #[test]
    fn bad_ids_are_validation_errors() {
        assert_eq!(parse_user_id("42").unwrap(), UserId::new(42));
        assert!(matches!(parse_user_id("abc"), Err(ApiError::Validation { .. })));
        assert!(matches!(parse_user_id("0"), Err(ApiError::Validation { .. })));
    }
}
