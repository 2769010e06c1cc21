//! HTTP API (axum).

pub mod error;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::info;

use crate::app::TaskService;

pub use self::error::ApiError;
pub use self::handlers::{CreateTaskRequest, ListTasksQuery};

/// Shared state for the task routes.
#[derive(Clone)]
pub struct AppState {
    pub service: TaskService,
}

/// Build the full API router.
pub fn router(service: TaskService) -> Router {
    Router::new()
        .route(
            "/api/v1/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/api/v1/tasks/{id}",
            get(handlers::get_task).delete(handlers::cancel_task),
        )
        .route("/api/v1/tasks/{id}/status", get(handlers::get_task_status))
        .route("/health", get(handlers::health))
        .with_state(AppState { service })
}

/// Serve `router` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    service: TaskService,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http api listening");
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}
