use std::sync::Arc;

use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use taskboard_server::auth::AuthState;
use taskboard_server::auth::api::v1::AuthApiState;
use taskboard_server::task::TaskState;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::{postgres, testcontainers};

pub struct TestContext {
    #[allow(dead_code)] // container is kept to ensure it's not dropped
    pub container: testcontainers::ContainerAsync<postgres::Postgres>,
    pub db: DatabaseConnection,
}

pub async fn setup_container() -> anyhow::Result<testcontainers::ContainerAsync<postgres::Postgres>>
{
    let container = postgres::Postgres::default().start().await?;
    Ok(container)
}

pub async fn setup_db(
    container: &testcontainers::ContainerAsync<postgres::Postgres>,
) -> anyhow::Result<DatabaseConnection> {
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(5432).await?;
    let db_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
    let db = Database::connect(&db_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup() -> anyhow::Result<TestContext> {
    // Allow multiple calls to init for tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .try_init();
    let container = setup_container().await?;
    let db = setup_db(&container).await?;
    Ok(TestContext { db, container })
}

/// Builds the full API router over the given database, the way
/// `start_web_server` assembles it.
#[allow(dead_code)]
pub fn test_app(db: &DatabaseConnection, jwt_secret: &str) -> axum::Router {
    let db = Arc::new(db.clone());
    let auth_state = Arc::new(AuthState {
        jwt_secret: jwt_secret.to_string(),
    });
    let auth_api_state = Arc::new(AuthApiState {
        db: db.clone(),
        auth: auth_state.clone(),
    });
    let task_state = Arc::new(TaskState { db });
    taskboard_server::web::api::create_api_router(auth_state, auth_api_state, task_state)
}
