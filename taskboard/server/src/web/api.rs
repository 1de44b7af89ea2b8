use std::sync::Arc;

use crate::{
    auth::{self, AuthState, api::v1::AuthApiState},
    task::{self, TaskState},
};

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};

use tower::ServiceBuilder;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod v1 {
    /// JSON body returned by every failing API endpoint: a stable error kind
    /// plus a human-readable message.
    #[derive(Debug, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
    pub struct ErrorResponse {
        pub error: String,
        pub message: String,
    }

    impl ErrorResponse {
        pub fn new(error: String, message: String) -> Self {
            Self { error, message }
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::auth::api::v1::register_handler,
        crate::auth::api::v1::json_login_handler,
        crate::task::api::v1::get_tasks_handler,
        crate::task::api::v1::create_task_handler,
        crate::task::api::v1::mark_done_handler,
        crate::task::api::v1::delete_task_handler,
    ),
    tags(
        (name = "Auth", description = "Registration and token issuance"),
        (name = "Tasks", description = "Task assignment and progress tracking")
    )
)]
pub struct ApiDoc;

/// Creates the API routes for JSON API endpoints.
pub fn create_api_router(
    auth_state: Arc<AuthState>,
    auth_api_state: Arc<AuthApiState>,
    task_state: Arc<TaskState>,
) -> axum::Router {
    let login_router = auth::api::v1::create_api_router(auth_api_state);
    let tasks_router = task::api::v1::create_api_router(task_state);
    let protected_routes = tasks_router
        .layer(ServiceBuilder::new().layer(from_fn(auth::api::v1::require_auth_middleware)));
    let public_routes = login_router;
    let api_routes = public_routes.merge(protected_routes);
    Router::new()
        .nest("/api/v1", api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(ServiceBuilder::new().layer(from_fn_with_state(
            auth_state,
            auth::api::v1::auth_user_middleware,
        )))
}
