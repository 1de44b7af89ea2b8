use migration::MigratorTrait;
use sea_orm::Database;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthState;
use crate::auth::api::v1::AuthApiState;
use crate::config;
use crate::task::TaskState;

pub mod api;

#[tracing::instrument(skip(config))]
pub async fn start_web_server(config: config::Config) -> anyhow::Result<()> {
    use axum::Router;

    let server_address = format!("0.0.0.0:{}", &config.port);
    let listener = tokio::net::TcpListener::bind(&server_address).await?;
    tracing::info!("Web server running on http://{}", server_address);

    let db = Database::connect(&config.db_url).await?;
    migration::Migrator::up(&db, None).await?;
    tracing::info!("Database migrations applied successfully");

    let db = Arc::new(db);
    let auth_state = Arc::new(AuthState::from_config(&config));
    let auth_api_state = Arc::new(AuthApiState {
        db: db.clone(),
        auth: auth_state.clone(),
    });
    let task_state = Arc::new(TaskState { db: db.clone() });

    let api_router = api::create_api_router(auth_state, auth_api_state, task_state);

    let app = Router::new()
        .route("/health", axum::routing::get(health_check_handler))
        .merge(api_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new()),
        );

    axum::serve(listener, app).await?;
    Ok(())
}

#[tracing::instrument]
pub async fn health_check_handler() -> &'static str {
    "OK"
}
