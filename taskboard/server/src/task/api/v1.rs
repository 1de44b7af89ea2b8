use crate::auth::CurrentUser;
use crate::task::rules::{Actor, AssignmentError};
use crate::task::{AssigneeProgress, Task, TaskFilter, TaskService, TaskServiceError, TaskState};
use crate::web::api::v1::ErrorResponse;
use axum::{
    Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
};
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// JSON representation of a user reference (id plus display name).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserRefJson {
    /// Unique identifier of the user
    pub id: i32,
    /// Display name of the user
    pub fullname: String,
}

/// JSON representation of a per-assignee progress record.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssigneeJson {
    /// Unique identifier of the assignee
    pub user_id: i32,
    /// Display name of the assignee
    pub fullname: String,
    /// Whether the assignee has marked their record done
    pub is_done: bool,
}

impl From<&AssigneeProgress> for AssigneeJson {
    fn from(progress: &AssigneeProgress) -> Self {
        Self {
            user_id: progress.user_id(),
            fullname: progress.fullname().to_string(),
            is_done: progress.is_done(),
        }
    }
}

/// JSON representation of a Task for API responses.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskJson {
    /// Unique identifier of the task
    pub id: i32,
    /// Title of the task
    pub title: String,
    /// Derived overall status: true iff every assignee is done
    pub status: bool,
    /// The user who assigned the task
    pub assigned_by: UserRefJson,
    /// Creation timestamp of the task
    pub created_at: DateTime<FixedOffset>,
    /// Per-assignee progress records
    pub assignees: Vec<AssigneeJson>,
}

impl From<Task> for TaskJson {
    fn from(task: Task) -> Self {
        Self {
            id: task.id(),
            title: task.title().to_string(),
            status: task.status(),
            assigned_by: UserRefJson {
                id: task.assigned_by(),
                fullname: task.assigned_by_name().to_string(),
            },
            created_at: task.created_at(),
            assignees: task.assignees().iter().map(AssigneeJson::from).collect(),
        }
    }
}

/// API response for listing tasks.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TasksResponse {
    /// List of tasks, newest first
    pub tasks: Vec<TaskJson>,
    /// Total number of tasks returned
    pub count: usize,
}

/// Query parameters for filtering tasks.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TasksQuery {
    /// Optional user ID to filter tasks by assignee
    #[serde(default)]
    assignee: Option<i32>,
    /// Optional local day to filter tasks by creation time
    #[serde(default)]
    day: Option<NaiveDate>,
    /// The caller's UTC offset in minutes, used with `day`
    #[serde(default)]
    utc_offset_minutes: Option<i32>,
    /// When true, only tasks that are not yet complete are returned
    #[serde(default)]
    incomplete: bool,
    /// Narrows the returned assignee view to display names with this prefix
    #[serde(default)]
    name_prefix: Option<String>,
}

impl From<TasksQuery> for TaskFilter {
    fn from(query: TasksQuery) -> Self {
        TaskFilter {
            assignee: query.assignee,
            day: query.day,
            utc_offset_minutes: query.utc_offset_minutes.unwrap_or(0),
            incomplete_only: query.incomplete,
            name_prefix: query.name_prefix,
        }
    }
}

/// JSON request payload for creating a task.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    /// Title of the task
    pub title: String,
    /// Requested assignees; normal users may omit this to assign to themselves
    #[serde(default)]
    pub assignees: Vec<i32>,
}

/// Creates and returns the tasks API router.
pub fn create_api_router(state: Arc<TaskState>) -> Router {
    Router::new()
        .route("/tasks", get(get_tasks_handler))
        .route("/tasks", post(create_task_handler))
        .route("/tasks/{id}/done", post(mark_done_handler))
        .route("/tasks/{id}", delete(delete_task_handler))
        .with_state(state)
}

/// Handler for GET /api/v1/tasks - Returns tasks matching the query filters,
/// newest first, with assignee and assigner names populated.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    params(
        ("assignee" = Option<i32>, Query, description = "Only tasks assigned to this user"),
        ("day" = Option<String>, Query, description = "Only tasks created within this local day (YYYY-MM-DD)"),
        ("utc_offset_minutes" = Option<i32>, Query, description = "Caller's UTC offset in minutes, used with day"),
        ("incomplete" = Option<bool>, Query, description = "Only tasks that are not yet complete"),
        ("name_prefix" = Option<String>, Query, description = "Narrow the returned assignee view to display names with this prefix")
    ),
    responses(
        (status = 200, description = "Successfully retrieved tasks", body = TasksResponse),
        (status = 400, description = "Invalid filter", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn get_tasks_handler(
    State(state): State<Arc<TaskState>>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<TasksResponse>, (StatusCode, Json<ErrorResponse>)> {
    let service = TaskService::new(&state.db);
    let filter = TaskFilter::from(query);

    let tasks = service.list_tasks(&filter).await.map_err(map_task_error)?;
    let json_tasks: Vec<TaskJson> = tasks.into_iter().map(TaskJson::from).collect();
    let count = json_tasks.len();

    Ok(Json(TasksResponse {
        tasks: json_tasks,
        count,
    }))
}

/// Handler for POST /api/v1/tasks - Creates a task assigned by the current user.
#[tracing::instrument(skip(state, current_user))]
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskJson),
        (status = 400, description = "Rejected assignment request", body = ErrorResponse),
        (status = 403, description = "Assignees not permitted for this actor", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn create_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskJson>), (StatusCode, Json<ErrorResponse>)> {
    let service = TaskService::new(&state.db);
    let actor = Actor::new(current_user.id, current_user.role);

    let task = service
        .create_task(actor, payload.title, &payload.assignees)
        .await
        .map_err(map_task_error)?;

    Ok((StatusCode::CREATED, Json(TaskJson::from(task))))
}

/// Handler for POST /api/v1/tasks/{id}/done - Marks the current user's
/// progress record on the task as done.
#[tracing::instrument(skip(state, current_user))]
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/done",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Progress recorded", body = TaskJson),
        (status = 403, description = "Caller is not assigned to the task", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 409, description = "Concurrent update, retry", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn mark_done_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(task_id): Path<i32>,
) -> Result<Json<TaskJson>, (StatusCode, Json<ErrorResponse>)> {
    let service = TaskService::new(&state.db);

    let task = service
        .mark_done(task_id, current_user.id)
        .await
        .map_err(map_task_error)?;

    Ok(Json(TaskJson::from(task)))
}

/// Handler for DELETE /api/v1/tasks/{id} - Deletes a task if the current user
/// is an admin or the task's creator.
#[tracing::instrument(skip(state, current_user))]
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{id}",
    params(("id" = i32, Path, description = "Task ID")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 403, description = "Caller may not delete this task", body = ErrorResponse),
        (status = 404, description = "Task not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Tasks"
)]
pub async fn delete_task_handler(
    State(state): State<Arc<TaskState>>,
    Extension(current_user): Extension<CurrentUser>,
    Path(task_id): Path<i32>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    let service = TaskService::new(&state.db);
    let actor = Actor::new(current_user.id, current_user.role);

    service
        .delete_task(actor, task_id)
        .await
        .map_err(map_task_error)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Maps task service errors to HTTP status codes with a stable error kind.
fn map_task_error(err: TaskServiceError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, kind) = match &err {
        TaskServiceError::Assignment(AssignmentError::EmptyAssignees) => {
            (StatusCode::BAD_REQUEST, "EMPTY_ASSIGNEES")
        }
        TaskServiceError::Assignment(AssignmentError::UnknownAssignee(_)) => {
            (StatusCode::BAD_REQUEST, "UNKNOWN_ASSIGNEE")
        }
        TaskServiceError::Assignment(AssignmentError::DuplicateAssignee(_)) => {
            (StatusCode::BAD_REQUEST, "DUPLICATE_ASSIGNEE")
        }
        TaskServiceError::Assignment(AssignmentError::ForbiddenAssignee) => {
            (StatusCode::FORBIDDEN, "FORBIDDEN_ASSIGNEE")
        }
        TaskServiceError::NotAssigned { .. } => (StatusCode::FORBIDDEN, "NOT_ASSIGNED"),
        TaskServiceError::TaskNotFound(_) => (StatusCode::NOT_FOUND, "TASK_NOT_FOUND"),
        TaskServiceError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
        TaskServiceError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        TaskServiceError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
        TaskServiceError::InvalidUtcOffset(_) => (StatusCode::BAD_REQUEST, "INVALID_UTC_OFFSET"),
        TaskServiceError::Database(_) => {
            tracing::error!("Task operation failed: {}", err);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(
                    "INTERNAL_ERROR".to_string(),
                    "An unexpected error occurred while processing your request".to_string(),
                )),
            );
        }
    };
    (status, Json(ErrorResponse::new(kind.to_string(), err.to_string())))
}
