//! Task endpoints under `/api/v1/tasks`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::app::{Page, PageRequest, TaskStatusView};
use crate::domain::{Task, TaskId, TaskPriority, TaskStatus};

/// Body of `POST /api/v1/tasks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to MEDIUM.
    #[serde(default)]
    pub priority: Option<TaskPriority>,
}

/// Query of `GET /api/v1/tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

fn parse_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::unprocessable(format!("invalid task id '{raw}': {e}")))
}

/// POST /api/v1/tasks
pub async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let Json(req) = body?;
    let task = state
        .service
        .submit(req.name, req.description, req.priority.unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/v1/tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    query: Result<Query<ListTasksQuery>, QueryRejection>,
) -> Result<Json<Page<Task>>, ApiError> {
    let Query(query) = query?;
    let request = PageRequest::new(query.page, query.size)?;
    let page = state.service.list(query.status, request).await?;
    Ok(Json(page))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = state.service.get(parse_id(&id)?).await?;
    Ok(Json(task))
}

/// GET /api/v1/tasks/{id}/status
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusView>, ApiError> {
    let view = state.service.status(parse_id(&id)?).await?;
    Ok(Json(view))
}

/// DELETE /api/v1/tasks/{id}
///
/// Cancels a NEW or PENDING task and returns the updated record.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = state.service.cancel(parse_id(&id)?).await?;
    Ok(Json(task))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
