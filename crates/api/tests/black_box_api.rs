use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use rolegate_api::app::{AppServices, build_app, build_services_with};
use rolegate_auth::{PasswordHasher, PolicyRule, RoleName};
use rolegate_core::UserId;
use rolegate_infra::config::{AppConfig, StorageDriver};

const SECRET: &str = "black-box-secret";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    async fn spawn_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        config.database.driver = StorageDriver::Memory;
        config.jwt.secret = SECRET.to_string();
        tweak(&mut config);

        // Same router as prod, in-memory stores, ephemeral port.
        let hasher = PasswordHasher::with_cost(64, 1, 1).unwrap();
        let services = Arc::new(build_services_with(&config, hasher).await.unwrap());
        let app = build_app(&config, services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            services,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn register(&self, username: &str, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/register"))
            .json(&json!({"username": username, "email": email, "password": password}))
            .send()
            .await
            .unwrap()
    }

    async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .unwrap()
    }

    /// Register and return `(user id, token)`.
    async fn signup(&self, username: &str) -> (u64, String) {
        let res = self.register(username, &format!("{username}@x"), "pw12345").await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        (
            body["user"]["id"].as_u64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    fn token_for(&self, id: u64, role: RoleName) -> String {
        self.services
            .tokens
            .sign(UserId::new(id), &role, chrono::Duration::minutes(10))
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn assert_envelope(body: &Value, code: u16) {
    assert_eq!(body["code"].as_u64(), Some(u64::from(code)), "body: {body}");
    assert!(body["message"].is_string(), "body: {body}");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn register_on_empty_store_returns_token_and_user() {
    let srv = TestServer::spawn().await;
    let res = srv.register("alice", "a@x", "pw12345").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let body: Value = res.json().await.unwrap();
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["email"], "a@x");
    assert_eq!(body["user"]["role"], "user");
    assert!(body["user"].get("password").is_none());
}

#[tokio::test]
async fn repeated_registration_conflicts() {
    let srv = TestServer::spawn().await;
    assert_eq!(srv.register("alice", "a@x", "pw12345").await.status(), StatusCode::CREATED);

    let res = srv.register("alice", "a@x", "pw12345").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_envelope(&body, 409);
    assert!(body["message"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn concurrent_registrations_yield_one_success() {
    let srv = Arc::new(TestServer::spawn().await);
    let attempts: Vec<_> = (0..6)
        .map(|i| {
            let srv = srv.clone();
            tokio::spawn(async move { srv.register("alice", &format!("a{i}@x"), "pw12345").await.status() })
        })
        .collect();

    let mut statuses = Vec::new();
    for attempt in attempts {
        statuses.push(attempt.await.unwrap());
    }
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 5);
}

#[tokio::test]
async fn login_succeeds_with_correct_password() {
    let srv = TestServer::spawn().await;
    srv.register("alice", "a@x", "pw12345").await;

    let res = srv.login("alice", "pw12345").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert_eq!(body["user"]["role"], "user");
}

#[tokio::test]
async fn wrong_password_and_unknown_user_look_identical() {
    let srv = TestServer::spawn().await;
    srv.register("alice", "a@x", "pw12345").await;

    let wrong = srv.login("alice", "nope").await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let wrong: Value = wrong.json().await.unwrap();

    let unknown = srv.login("mallory", "nope").await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown: Value = unknown.json().await.unwrap();

    assert_envelope(&wrong, 401);
    assert_eq!(wrong, unknown);
}

#[tokio::test]
async fn invalid_bodies_are_validation_errors() {
    let srv = TestServer::spawn().await;

    let res = srv.register("al", "not-an-email", "123").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_envelope(&body, 400);
    let details = body["details"].as_str().unwrap();
    assert!(details.contains("username"), "details: {details}");
    assert!(details.contains("email"), "details: {details}");
    assert!(details.contains("password"), "details: {details}");
    assert!(details.contains("; "), "details: {details}");

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_envelope(&res.json().await.unwrap(), 400);
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/users/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_envelope(&res.json().await.unwrap(), 401);

    let res = srv
        .client
        .get(srv.url("/users/"))
        .header("authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/users/")).bearer_auth("garbage").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tokens_signed_with_another_key_are_rejected() {
    let srv = TestServer::spawn().await;
    let now = Utc::now().timestamp();
    let forged = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &json!({"sub": 1, "role": "admin", "iat": now, "exp": now + 600}),
        &EncodingKey::from_secret(b"some-other-secret"),
    )
    .unwrap();

    let res = srv.client.get(srv.url("/users/")).bearer_auth(forged).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn expired_tokens_are_rejected() {
    let srv = TestServer::spawn().await;
    let now = Utc::now().timestamp();
    let expired = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &json!({"sub": 1, "role": "admin", "iat": now - 600, "exp": now - 60}),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();

    let res = srv.client.get(srv.url("/users/")).bearer_auth(expired).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_lists_users() {
    let srv = TestServer::spawn().await;
    srv.services
        .policy
        .add_rule(PolicyRule::new("admin", "/users", "GET"))
        .await
        .unwrap();
    srv.signup("alice").await;
    srv.signup("bob").await;

    let admin = srv.token_for(999, RoleName::ADMIN);
    let res = srv.client.get(srv.url("/users/")).bearer_auth(admin).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["alice", "bob"]);
}

#[tokio::test]
async fn regular_user_cannot_list_users() {
    let srv = TestServer::spawn().await;
    let (_, token) = srv.signup("alice").await;

    let res = srv.client.get(srv.url("/users/")).bearer_auth(token).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_envelope(&res.json().await.unwrap(), 403);
}

#[tokio::test]
async fn user_updates_self_but_not_others() {
    let srv = TestServer::spawn().await;
    let (alice, token) = srv.signup("alice").await;
    let (bob, _) = srv.signup("bob").await;

    let res = srv
        .client
        .put(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&token)
        .json(&json!({"username": "alicia", "password": "ignored"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["username"], "alicia");
    assert_eq!(body["email"], "alice@x");

    // The policy allows PUT /users/:id for `user`; the service predicate refuses.
    let res = srv
        .client
        .put(srv.url(&format!("/users/{bob}")))
        .bearer_auth(&token)
        .json(&json!({"username": "hijacked"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn role_change_is_dropped_for_non_admins() {
    let srv = TestServer::spawn().await;
    let (alice, token) = srv.signup("alice").await;

    let res = srv
        .client
        .get(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let before: Value = res.json().await.unwrap();

    let res = srv
        .client
        .put(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&token)
        .json(&json!({"role_id": 1, "email": "alice@new"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let after: Value = res.json().await.unwrap();
    assert_eq!(after["email"], "alice@new");
    assert_eq!(after["role_id"], before["role_id"]);
    assert_eq!(after["role"], "user");
}

#[tokio::test]
async fn admin_can_promote() {
    let srv = TestServer::spawn().await;
    let (alice, _) = srv.signup("alice").await;
    let admin = srv.token_for(999, RoleName::ADMIN);

    // Bootstrap creates `admin` first.
    let res = srv
        .client
        .put(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&admin)
        .json(&json!({"role_id": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["role_id"], 1);
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn admin_deletes_user() {
    let srv = TestServer::spawn().await;
    let (alice, token) = srv.signup("alice").await;
    let admin = srv.token_for(999, RoleName::ADMIN);

    // `user` has no DELETE rule.
    let res = srv
        .client
        .delete(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .delete(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert!(body["message"].is_string());

    let res = srv
        .client
        .get(srv.url(&format!("/users/{alice}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_envelope(&res.json().await.unwrap(), 404);

    assert_eq!(srv.login("alice", "pw12345").await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let srv = TestServer::spawn().await;
    let admin = srv.token_for(999, RoleName::ADMIN);

    let res = srv.client.get(srv.url("/users/abc")).bearer_auth(&admin).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_envelope(&res.json().await.unwrap(), 400);
}

#[tokio::test]
async fn inherited_roles_gain_parent_rules() {
    let srv = TestServer::spawn().await;
    srv.services
        .policy
        .add_grouping(rolegate_auth::RoleGrouping::new("auditor", "lister"))
        .await
        .unwrap();
    srv.services
        .policy
        .add_rule(PolicyRule::new("lister", "/users", "GET"))
        .await
        .unwrap();

    let auditor = srv.token_for(5, RoleName::new("auditor"));
    let res = srv.client.get(srv.url("/users/")).bearer_auth(auditor).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limiter_trips() {
    let srv = TestServer::spawn_with(|c| {
        c.ratelimiter.limit = 3;
        c.ratelimiter.period = "1h".into();
    })
    .await;

    for _ in 0..3 {
        let res = srv.client.get(srv.url("/health")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_envelope(&res.json().await.unwrap(), 429);
}

#[tokio::test]
async fn unknown_routes_use_the_envelope() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_envelope(&res.json().await.unwrap(), 404);
}

#[tokio::test]
async fn unrouted_methods_use_the_envelope() {
    let srv = TestServer::spawn().await;
    let res = srv.client.delete(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(res.headers().contains_key("allow"));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_envelope(&body, 405);
    assert_eq!(body["message"], "method not allowed");
}

#[tokio::test]
async fn request_id_is_echoed_or_minted() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .get(srv.url("/health"))
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-123");

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert!(!res.headers()["x-request-id"].is_empty());
}
