mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{setup, test_app};
use serde_json::json;
use taskboard_server::auth::api::v1::{LoginResponse, UserResponse};
use taskboard_server::user::Role;
use taskboard_server::web::api::v1::ErrorResponse;
use tower::ServiceExt;

const JWT_SECRET: &str = "test_secret";

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn can_register_a_new_user() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let app = test_app(&ctx.db, JWT_SECRET);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/register",
            json!({"username": "alice", "fullname": "Alice Doe", "password": "secret"}),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::CREATED);
    let user: UserResponse = body_json(response).await;
    assert_eq!(user.username, "alice");
    assert_eq!(user.fullname, "Alice Doe");
    assert_eq!(user.role, Role::Normal);
    Ok(())
}

#[tokio::test]
async fn cannot_register_a_taken_username() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let app = test_app(&ctx.db, JWT_SECRET);

    let payload = json!({"username": "alice", "fullname": "Alice Doe", "password": "secret"});
    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/register", payload.clone()))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(json_request("POST", "/api/v1/register", payload))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "DUPLICATE_USERNAME");
    Ok(())
}

#[tokio::test]
async fn can_login_with_valid_credentials() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let app = test_app(&ctx.db, JWT_SECRET);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/register",
            json!({"username": "alice", "fullname": "Alice Doe", "password": "secret"}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            json!({"username": "alice", "password": "secret"}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let login: LoginResponse = body_json(response).await;

    // The issued token grants access to protected routes.
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/tasks")
                .header("authorization", format!("Bearer {}", login.token))
                .body(Body::empty())
                .unwrap(),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn cannot_login_with_invalid_credentials() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let app = test_app(&ctx.db, JWT_SECRET);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/register",
            json!({"username": "alice", "fullname": "Alice Doe", "password": "secret"}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/login",
            json!({"username": "alice", "password": "wrong"}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "INVALID_CREDENTIALS");
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let app = test_app(&ctx.db, JWT_SECRET);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/v1/tasks")
                .body(Body::empty())
                .unwrap(),
        )
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "UNAUTHORIZED");
    Ok(())
}
