use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
};

use crate::app::dto::{self, AuthResponse, LoginRequest, RegisterRequest, UserResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let body = dto::json_body(body)?;
    let session = services.auth.register(body.into()).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserResponse::from(&session.user),
            token: session.token,
        }),
    ))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let body = dto::json_body(body)?;
    let session = services.auth.login(body.into()).await?;

    Ok(Json(AuthResponse {
        user: UserResponse::from(&session.user),
        token: session.token,
    }))
}
