use crate::auth::{AuthState, CurrentUser, decode_jwt, encode_jwt};
use crate::user::{Role, User, UserService, UserServiceError};
use crate::web::api::v1::ErrorResponse;
use axum::{
    Json, Router,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::post,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use utoipa::ToSchema;

/// State for the authentication endpoints: user directory plus JWT secret.
#[derive(Clone)]
pub struct AuthApiState {
    pub db: Arc<DatabaseConnection>,
    pub auth: Arc<AuthState>,
}

/// JSON request payload for registration.
#[derive(serde::Deserialize, Debug, ToSchema)]
pub struct RegisterRequest {
    /// Unique username used to log in
    pub username: String,
    /// Display name of the user
    pub fullname: String,
    /// Plaintext password; only its hash is stored
    pub password: String,
}

/// JSON representation of a user for API responses.
#[derive(serde::Serialize, serde::Deserialize, Debug, ToSchema)]
pub struct UserResponse {
    /// Unique identifier of the user
    pub id: i32,
    /// Unique username used to log in
    pub username: String,
    /// Display name of the user
    pub fullname: String,
    /// Role of the user
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id(),
            username: user.username().to_string(),
            fullname: user.fullname().to_string(),
            role: user.role(),
        }
    }
}

/// JSON request payload for API login
#[derive(serde::Deserialize, Debug, ToSchema)]
pub struct JsonLoginRequest {
    pub username: String,
    pub password: String,
}

/// JSON response for successful API login
#[derive(serde::Serialize, serde::Deserialize, Debug, ToSchema)]
pub struct LoginResponse {
    pub token: String,
}

/// Creates a JSON API router for authentication endpoints.
pub fn create_api_router(state: Arc<AuthApiState>) -> Router<()> {
    Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(json_login_handler))
        .with_state(state)
}

/// API authentication middleware that extracts the current user from Authorization Bearer header.
/// Sets the CurrentUser extension if a valid JWT token is found in the Authorization header.
pub async fn auth_user_middleware(
    State(state): State<Arc<AuthState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                if let Ok(claims) = decode_jwt(token, &state.jwt_secret).await {
                    let current_user = CurrentUser::new(claims.sub, claims.username, claims.role);
                    request.extensions_mut().insert(current_user);
                }
            }
        }
    }

    next.run(request).await
}

/// Middleware that ensures the current user is authenticated.
/// Returns UNAUTHORIZED if the CurrentUser extension is not found in the request.
/// This middleware should be applied after auth_user_middleware.
pub async fn require_auth_middleware(request: Request, next: Next) -> Response {
    // Check if user is authenticated by looking for CurrentUser extension
    let is_authenticated = request.extensions().get::<CurrentUser>().is_some();

    if !is_authenticated {
        let error_response = ErrorResponse::new(
            "UNAUTHORIZED".to_string(),
            "Authentication required to access this resource".to_string(),
        );
        return (StatusCode::UNAUTHORIZED, Json(error_response)).into_response();
    }

    next.run(request).await
}

/// Handler for POST /api/v1/register - Creates a new user account.
/// New accounts always get the normal role.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/api/v1/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 409, description = "Username already taken", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), (StatusCode, Json<ErrorResponse>)> {
    let service = UserService::new(&state.db);
    let user = service
        .create_user(payload.username, payload.fullname, &payload.password, Role::Normal)
        .await
        .map_err(map_user_error)?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Handles JSON login requests and returns a JWT token.
/// Validates credentials against the user directory and returns either a
/// success response with token or an error.
#[tracing::instrument(skip(state, payload))]
#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = JsonLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Auth"
)]
pub async fn json_login_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(payload): Json<JsonLoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ErrorResponse>)> {
    let service = UserService::new(&state.db);
    let user = service
        .authenticate(&payload.username, &payload.password)
        .await
        .map_err(map_user_error)?;

    let jwt_token = encode_jwt(&user, &state.auth.jwt_secret)
        .await
        .map_err(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(
                    "JWT_ERROR".to_string(),
                    "Failed to generate authentication token".to_string(),
                )),
            )
        })?;

    Ok(Json(LoginResponse { token: jwt_token }))
}

/// Maps user service errors to HTTP status codes with a stable error kind.
fn map_user_error(err: UserServiceError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, kind) = match &err {
        UserServiceError::DuplicateUsername(_) => (StatusCode::CONFLICT, "DUPLICATE_USERNAME"),
        UserServiceError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
        UserServiceError::UserNotFound(_) => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
        UserServiceError::PasswordHash(_)
        | UserServiceError::UnknownRole(_)
        | UserServiceError::Database(_) => {
            tracing::error!("User operation failed: {}", err);
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
