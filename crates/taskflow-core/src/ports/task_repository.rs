//! TaskRepository port - Task レコードの正本（source of truth）
//!
//! Generic create/get/list/update over Task rows. The Task Store wraps this
//! port and is the only caller; API and worker code never touch it directly.

use async_trait::async_trait;

use crate::domain::{StorageError, Task, TaskId, TaskStatus};

/// Row filter for `list` / `count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|status| task.status == status)
    }
}

/// TaskRepository は Task 行の保存先
///
/// # 設計原則
/// - 1 行の書き込みはアトミック
/// - `update` は条件付き: 保存されている status が `expected` と一致する時だけ書く
///   （一致しなければ `StorageError::StaleRecord`）
/// - 行は削除しない
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: Task) -> Result<Task, StorageError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError>;

    /// Rows matching `filter`, in insertion order.
    async fn list(
        &self,
        filter: TaskFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError>;

    async fn count(&self, filter: TaskFilter) -> Result<usize, StorageError>;

    /// Overwrite the row for `task.id` if its stored status is still `expected`.
    async fn update(&self, task: Task, expected: TaskStatus) -> Result<Task, StorageError>;
}
