//! Test utilities and common setup.

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use squadron::api::{create_router, AppState};
use squadron::db::Database;
use squadron::settings::Settings;

/// Build an app over an in-memory database with throwaway directories and
/// a backend binary that cannot exist, so backend-dependent paths fail
/// fast and deterministically.
pub async fn test_app() -> Router {
    let db = Database::in_memory().await.expect("in-memory db");

    let mut settings = Settings::default();
    settings.storage.data_dir = tempfile::tempdir().unwrap().keep();
    settings.storage.state_dir = tempfile::tempdir().unwrap().keep();
    settings.opencode.binary = "/nonexistent/opencode-test".to_string();
    settings.opencode.provisioning_timeout_secs = 1;
    settings.nodes.scan_enabled = false;

    let state = AppState::build(&db, &settings);
    create_router(state)
}

/// One request against the router, returning status and parsed JSON body
/// (Null for empty bodies).
pub async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response: Response<Body> = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 4 * 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    request(app, Method::GET, uri, None).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    request(app, Method::POST, uri, Some(body)).await
}
