//! TaskService - API 側のオーケストレーション（TaskStore + QueueGateway）
//!
//! # submit のフロー
//! 1. TaskStore::create() → NEW
//! 2. NEW → PENDING
//! 3. QueueGateway::publish()
//! 4. publish 失敗時は PENDING → FAILED（メッセージの無い PENDING を残さない）

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::gateway::QueueGateway;
use super::pagination::{Page, PageRequest};
use super::task_store::TaskStore;
use crate::domain::{Task, TaskError, TaskId, TaskPriority, TaskStatus, TaskUpdate};

/// `{id, status}` view of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub id: TaskId,
    pub status: TaskStatus,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            status: task.status,
        }
    }
}

#[derive(Clone)]
pub struct TaskService {
    store: Arc<TaskStore>,
    gateway: Arc<QueueGateway>,
}

impl TaskService {
    pub fn new(store: Arc<TaskStore>, gateway: Arc<QueueGateway>) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Create a task and hand it to the queue. Returns the PENDING record.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        priority: TaskPriority,
    ) -> Result<Task, TaskError> {
        let task = self.store.create(name, description, priority).await?;
        let task = self
            .store
            .transition(&task, TaskStatus::Pending, TaskUpdate::none())
            .await?;

        if let Err(publish_err) = self.gateway.publish(task.id, task.priority.weight()).await {
            let reason = format!("Failed to publish task: {publish_err}");
            let update = TaskUpdate::failed(self.store.now(), reason);
            match self.store.transition(&task, TaskStatus::Failed, update).await {
                Ok(_) => warn!(task_id = %task.id, "task marked FAILED after publish failure"),
                Err(mark_err) => error!(
                    task_id = %task.id,
                    error = %mark_err,
                    "could not mark task FAILED after publish failure"
                ),
            }
            return Err(publish_err.into());
        }

        info!(task_id = %task.id, priority = %task.priority, "task submitted");
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        self.store.get(id).await?.ok_or(TaskError::NotFound(id))
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskStatusView, TaskError> {
        self.get(id).await.map(|task| TaskStatusView::from(&task))
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        request: PageRequest,
    ) -> Result<Page<Task>, TaskError> {
        let total = self.store.count(status).await?;
        let items = self
            .store
            .list(request.offset(), request.size(), status)
            .await?;
        Ok(Page::new(items, total, request))
    }

    /// Cancel a NEW or PENDING task.
    ///
    /// - `NotFound` if the id is unknown
    /// - `NotCancellable` if the task is already past PENDING
    /// - `InvalidTransition` if a worker moved it between our read and write
    pub async fn cancel(&self, id: TaskId) -> Result<Task, TaskError> {
        let task = self.get(id).await?;
        if !task.status.is_cancellable() {
            return Err(TaskError::NotCancellable {
                id,
                status: task.status,
            });
        }
        let cancelled = self
            .store
            .transition(&task, TaskStatus::Cancelled, TaskUpdate::none())
            .await?;
        info!(task_id = %id, "task cancelled");
        Ok(cancelled)
    }
}
