use axum::Json;

use crate::app::dto::HealthResponse;
use crate::app::errors::ApiError;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("route not found".into())
}
