use axum::{
    Router,
    routing::{get, post},
};

pub mod auth;
pub mod system;
pub mod users;

/// `/auth/*`: no credential or policy stage.
pub fn public_router() -> Router {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
}

/// `/users/*`: the caller adds the credential and policy stages.
pub fn users_router() -> Router {
    Router::new()
        .route("/users/", get(users::list_users))
        .route("/users", get(users::list_users))
        .route(
            "/users/:id",
            get(users::get_user).put(users::update_user).delete(users::delete_user),
        )
}
