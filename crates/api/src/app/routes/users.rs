use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
};

use crate::app::dto::{self, MessageResponse, UpdateUserRequest, UserResponse};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub async fn list_users(Extension(services): Extension<Arc<AppServices>>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = services.users.list().await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = dto::parse_user_id(&id)?;
    let user = services.users.get(id).await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = dto::parse_user_id(&id)?;
    let patch = dto::json_body(body)?;
    let user = services
        .users
        .update(id, principal.principal(), patch.into())
        .await?;
    Ok(Json(UserResponse::from(&user)))
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = dto::parse_user_id(&id)?;
    services.users.delete(id).await?;
    Ok(Json(MessageResponse {
        message: "user deleted".into(),
    }))
}
