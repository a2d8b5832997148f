//! Policy stage: ask the policy engine whether the caller's role may perform
//! this method on this route.

use std::sync::Arc;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use rolegate_auth::{Decision, PolicyEngine, RoleName};

use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

/// Object the policy is evaluated against: the matched route template
/// (`/users/:id`) when known, otherwise the raw path, without a trailing `/`.
pub fn policy_object(matched: Option<&str>, raw_path: &str) -> String {
    let path = matched.unwrap_or(raw_path);
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => path.to_string(),
    }
}

pub async fn policy_middleware(
    State(engine): State<Arc<PolicyEngine>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let role = req
        .extensions()
        .get::<PrincipalContext>()
        .map(|p| p.role().clone())
        .unwrap_or(RoleName::ANONYMOUS);
    let object = policy_object(
        req.extensions().get::<MatchedPath>().map(MatchedPath::as_str),
        req.uri().path(),
    );
    let action = req.method().as_str().to_owned();

    match engine.decide(role.as_str(), &object, &action)? {
        Decision::Allow => Ok(next.run(req).await),
        Decision::Deny => {
            debug!(%role, %object, %action, "policy denied request");
            Err(ApiError::Forbidden("forbidden".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_prefers_route_template() {
        assert_eq!(policy_object(Some("/users/:id"), "/users/7"), "/users/:id");
        assert_eq!(policy_object(None, "/users/7"), "/users/7");
    }

    #[test]
    fn trailing_slash_is_dropped() {
        assert_eq!(policy_object(Some("/users/"), "/users/"), "/users");
        assert_eq!(policy_object(None, "/"), "/");
    }
}
