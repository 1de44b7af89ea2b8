mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestContext, setup, test_app};
use serde_json::json;
use taskboard_server::auth::encode_jwt;
use taskboard_server::task::api::v1::{TaskJson, TasksResponse};
use taskboard_server::user::{Role, User, UserService};
use taskboard_server::web::api::v1::ErrorResponse;
use tower::ServiceExt;

const JWT_SECRET: &str = "test_secret";

async fn create_user(ctx: &TestContext, username: &str, fullname: &str, role: Role) -> User {
    UserService::new(&ctx.db)
        .create_user(username.to_string(), fullname.to_string(), "pw", role)
        .await
        .expect("user creation should succeed")
}

async fn bearer_token(user: &User) -> String {
    let token = encode_jwt(user, JWT_SECRET).await.expect("token");
    format!("Bearer {}", token)
}

fn json_request(method: &str, uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", token)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", token)
        .body(Body::empty())
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn admin_can_create_a_task_for_several_users() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let u1 = create_user(&ctx, "u1", "User One", Role::Normal).await;
    let u2 = create_user(&ctx, "u2", "User Two", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);
    let token = bearer_token(&admin).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &token,
            json!({"title": "Ship it", "assignees": [u1.id(), u2.id()]}),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::CREATED);
    let task: TaskJson = body_json(response).await;
    assert_eq!(task.title, "Ship it");
    assert!(!task.status);
    assert_eq!(task.assigned_by.fullname, "Admin");
    assert_eq!(task.assignees.len(), 2);
    assert!(task.assignees.iter().all(|a| !a.is_done));
    Ok(())
}

#[tokio::test]
async fn admin_cannot_create_a_task_without_assignees() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let app = test_app(&ctx.db, JWT_SECRET);
    let token = bearer_token(&admin).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &token,
            json!({"title": "Nobody's job", "assignees": []}),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "EMPTY_ASSIGNEES");
    Ok(())
}

#[tokio::test]
async fn normal_user_cannot_assign_a_task_to_someone_else() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let u3 = create_user(&ctx, "u3", "User Three", Role::Normal).await;
    let u4 = create_user(&ctx, "u4", "User Four", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);
    let token = bearer_token(&u3).await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &token,
            json!({"title": "Delegated", "assignees": [u4.id()]}),
        ))
        .await?;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "FORBIDDEN_ASSIGNEE");
    Ok(())
}

#[tokio::test]
async fn marking_progress_completes_the_task_once_everyone_is_done() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let u1 = create_user(&ctx, "u1", "User One", Role::Normal).await;
    let u2 = create_user(&ctx, "u2", "User Two", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);
    let admin_token = bearer_token(&admin).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &admin_token,
            json!({"title": "Team job", "assignees": [u1.id(), u2.id()]}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let task: TaskJson = body_json(response).await;

    let done_uri = format!("/api/v1/tasks/{}/done", task.id);
    let response = app
        .clone()
        .oneshot(empty_request("POST", &done_uri, &bearer_token(&u1).await))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let after_first: TaskJson = body_json(response).await;
    assert!(!after_first.status);

    let response = app
        .oneshot(empty_request("POST", &done_uri, &bearer_token(&u2).await))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let after_second: TaskJson = body_json(response).await;
    assert!(after_second.status);
    Ok(())
}

#[tokio::test]
async fn non_assignee_cannot_mark_progress() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let u1 = create_user(&ctx, "u1", "User One", Role::Normal).await;
    let outsider = create_user(&ctx, "outsider", "Outsider", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &bearer_token(&admin).await,
            json!({"title": "Private", "assignees": [u1.id()]}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let task: TaskJson = body_json(response).await;

    let response = app
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/tasks/{}/done", task.id),
            &bearer_token(&outsider).await,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "NOT_ASSIGNED");
    Ok(())
}

#[tokio::test]
async fn deletion_is_limited_to_admins_and_creators() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let creator = create_user(&ctx, "creator", "Creator", Role::Normal).await;
    let other = create_user(&ctx, "other", "Other", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &bearer_token(&creator).await,
            json!({"title": "Mine"}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let task: TaskJson = body_json(response).await;
    let task_uri = format!("/api/v1/tasks/{}", task.id);

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &task_uri, &bearer_token(&other).await))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let error: ErrorResponse = body_json(response).await;
    assert_eq!(error.error, "FORBIDDEN");

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &task_uri, &bearer_token(&admin).await))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Deleting it again reports not found.
    let response = app
        .oneshot(empty_request("DELETE", &task_uri, &bearer_token(&admin).await))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn list_supports_assignee_and_incomplete_filters() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let u1 = create_user(&ctx, "u1", "User One", Role::Normal).await;
    let u2 = create_user(&ctx, "u2", "User Two", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);
    let admin_token = bearer_token(&admin).await;

    for (title, assignee) in [("For one", u1.id()), ("For two", u2.id())] {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/tasks",
                &admin_token,
                json!({"title": title, "assignees": [assignee]}),
            ))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/tasks?assignee={}", u1.id()),
            &admin_token,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let listing: TasksResponse = body_json(response).await;
    assert_eq!(listing.count, 1);
    assert_eq!(listing.tasks[0].title, "For one");

    let task_id = listing.tasks[0].id;
    let response = app
        .clone()
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/tasks/{}/done", task_id),
            &bearer_token(&u1).await,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/tasks?assignee={}&incomplete=true", u1.id()),
            &admin_token,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let listing: TasksResponse = body_json(response).await;
    assert_eq!(listing.count, 0);
    Ok(())
}

#[tokio::test]
async fn list_narrows_assignee_names_by_prefix() -> anyhow::Result<()> {
    let ctx = setup().await?;
    let admin = create_user(&ctx, "admin", "Admin", Role::Admin).await;
    let nguyen = create_user(&ctx, "nguyen", "Nguyễn Văn A", Role::Normal).await;
    let tran = create_user(&ctx, "tran", "Trần Thị B", Role::Normal).await;
    let app = test_app(&ctx.db, JWT_SECRET);
    let admin_token = bearer_token(&admin).await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/tasks",
            &admin_token,
            json!({"title": "Shared", "assignees": [nguyen.id(), tran.id()]}),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(empty_request(
            "GET",
            "/api/v1/tasks?name_prefix=Nguy%E1%BB%85n",
            &admin_token,
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let listing: TasksResponse = body_json(response).await;
    assert_eq!(listing.count, 1);
    assert_eq!(listing.tasks[0].assignees.len(), 1);
    assert_eq!(listing.tasks[0].assignees[0].fullname, "Nguyễn Văn A");
    Ok(())
}
