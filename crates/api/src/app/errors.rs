//! The single error kind set of the HTTP surface and the terminal stage that
//! renders it.
//!
//! Handlers and middleware return [`ApiError`]. Its `IntoResponse` impl only
//! sets the status and parks the error in the response extensions;
//! [`error_envelope`] picks it up, logs it and writes the JSON envelope.

use std::any::Any;

use axum::{
    Json,
    extract::Request,
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use rolegate_auth::{AuthError, PolicyError, TokenError, UserServiceError};
use rolegate_core::DomainError;

const INTERNAL_MESSAGE: &str = "internal server error";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("{message}")]
    Validation { message: String, details: Option<String> },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("too many requests")]
    TooManyRequests,

    /// The payload is logged, never returned to the client.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(details: impl Into<String>) -> Self {
        ApiError::Validation {
            message: "validation failed".to_string(),
            details: Some(details.into()),
        }
    }

    pub fn internal(err: impl core::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let (message, details) = match self {
            ApiError::Validation { message, details } => (message.clone(), details.clone()),
            ApiError::Internal(_) => (INTERNAL_MESSAGE.to_string(), None),
            other => (other.to_string(), None),
        };
        ErrorEnvelope {
            code: self.status().as_u16(),
            message,
            details,
        }
    }
}

/// `{code, message, details?}`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorEnvelope {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Terminal error stage: renders any [`ApiError`] left in the response, and
/// the router's bare 405 for a known path with an unrouted method.
pub async fn error_envelope(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let mut response = next.run(req).await;

    let err = match response.extensions_mut().remove::<ApiError>() {
        Some(err) => err,
        None if response.status() == StatusCode::METHOD_NOT_ALLOWED => ApiError::MethodNotAllowed,
        None => return response,
    };

    let status = err.status();
    if status.is_server_error() {
        error!(%method, %path, status = status.as_u16(), error = %err, "request failed");
    } else if status.is_client_error() {
        warn!(%method, %path, status = status.as_u16(), error = %err, "request rejected");
    } else {
        info!(%method, %path, status = status.as_u16(), error = %err, "request finished with error");
    }

    let mut rendered = (status, Json(err.envelope())).into_response();
    if let Some(allow) = response.headers().get(header::ALLOW) {
        rendered.headers_mut().insert(header::ALLOW, allow.clone());
    }
    rendered
}

/// Panic handler for `CatchPanicLayer`.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    error!(panic = %detail, "handler panicked");

    let err = ApiError::Internal(detail);
    (err.status(), Json(err.envelope())).into_response()
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(details) | DomainError::InvalidId(details) => ApiError::validation(details),
            DomainError::NotFound => ApiError::NotFound("not found".into()),
            DomainError::Conflict(msg) => ApiError::Conflict(msg),
            DomainError::Unauthorized => ApiError::Unauthorized("unauthorized".into()),
            DomainError::Forbidden => ApiError::Forbidden("forbidden".into()),
            DomainError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(value: AuthError) -> Self {
        match value {
            AuthError::UserExists => ApiError::Conflict("user already exists".into()),
            AuthError::InvalidCredentials => ApiError::Unauthorized("invalid username or password".into()),
            AuthError::Validation(details) => ApiError::validation(details),
            AuthError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(value: UserServiceError) -> Self {
        match value {
            UserServiceError::PermissionDenied => ApiError::Forbidden("permission denied".into()),
            UserServiceError::NotFound => ApiError::NotFound("user not found".into()),
            UserServiceError::Validation(details) => ApiError::validation(details),
            UserServiceError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Expired => ApiError::Unauthorized("token expired".into()),
            TokenError::Malformed(_) | TokenError::BadSignature => ApiError::Unauthorized("invalid token".into()),
            TokenError::Signing(msg) => ApiError::Internal(msg),
            TokenError::EmptySecret => ApiError::Internal("token signing key is empty".into()),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(value: PolicyError) -> Self {
        ApiError::Internal(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_total() {
        let cases = [
            (ApiError::validation("username is required"), 400),
            (ApiError::Unauthorized("x".into()), 401),
            (ApiError::Forbidden("x".into()), 403),
            (ApiError::NotFound("x".into()), 404),
            (ApiError::Conflict("x".into()), 409),
            (ApiError::MethodNotAllowed, 405),
            (ApiError::TooManyRequests, 429),
            (ApiError::Internal("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(err.status().as_u16(), code);
            assert_eq!(err.envelope().code, code);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let env = ApiError::Internal("connection refused to 10.0.0.3".into()).envelope();
        assert_eq!(env.message, INTERNAL_MESSAGE);
        assert!(env.details.is_none());
    }

    #[test]
    fn validation_carries_details() {
        let env = ApiError::from(DomainError::validation("username is required; email is invalid")).envelope();
        assert_eq!(env.code, 400);
        assert_eq!(env.details.as_deref(), Some("username is required; email is invalid"));

        let json = serde_json::to_value(ApiError::NotFound("user not found".into()).envelope()).unwrap();
        assert!(json.get("details").is_none());
    }

    #[test]
    fn login_failures_share_one_message() {
        assert_eq!(
            ApiError::from(AuthError::InvalidCredentials).envelope(),
            ApiError::from(AuthError::InvalidCredentials).envelope()
        );
        assert!(ApiError::from(AuthError::UserExists).to_string().contains("already exists"));
    }
}
