//! Shared helpers for router tests.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::db::MemoryStore;
use crate::routes::auth::TokenPair;
use crate::{create_app, AppState};

pub const TEST_PASSWORD: &str = "testpassword123";

/// Application state over an empty in-memory store. The returned directory
/// backs the media root and must outlive the state.
pub fn test_state() -> (AppState, TempDir) {
    let media = tempfile::tempdir().expect("create media tempdir");
    let config = AppConfig {
        jwt_secret: "test-secret".to_string(),
        bcrypt_cost: 4,
        media_dir: media.path().to_path_buf(),
        ..AppConfig::default()
    };
    let state = AppState {
        store: Arc::new(MemoryStore::new()),
        config: Arc::new(config),
    };
    (state, media)
}

pub fn test_app() -> (Router, TempDir) {
    let (state, media) = test_state();
    (create_app(state), media)
}

/// Send a request with an optional JSON body and bearer token, returning the
/// status and the parsed body (`Value::Null` when empty).
pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Send a raw body (JSON content type unless empty) and return the status
/// and the response text, byte for byte.
pub async fn send_raw(
    app: Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: &str,
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    if !body.is_empty() {
        builder = builder.header("content-type", "application/json");
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

pub async fn register_user(app: Router, username: &str) {
    let (status, _) = send_json(
        app,
        Method::POST,
        "/api/auth/register/",
        None,
        Some(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": TEST_PASSWORD
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

pub async fn login_tokens(app: Router, username: &str) -> TokenPair {
    let (status, body) = send_json(
        app,
        Method::POST,
        "/api/auth/login/",
        None,
        Some(json!({"username": username, "password": TEST_PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(body).unwrap()
}

/// Register `username` and return a valid access token for it.
pub async fn access_token_for(app: Router, username: &str) -> String {
    register_user(app.clone(), username).await;
    login_tokens(app, username).await.access
}
