//! InMemoryTaskRepository - 開発用の datastore
//!
//! # 実装詳細
//! - Vec<Task> で挿入順を保持、HashMap<TaskId, usize> で index
//! - tokio RwLock で排他制御（await を跨いでロックを持たない）
//! - `set_online(false)` で datastore 障害を再現できる

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{StorageError, Task, TaskId, TaskStatus};
use crate::ports::{TaskFilter, TaskRepository};

#[derive(Default)]
struct RepositoryState {
    /// Rows in insertion order.
    rows: Vec<Task>,

    /// id -> position in `rows`.
    index: HashMap<TaskId, usize>,
}

pub struct InMemoryTaskRepository {
    state: RwLock<RepositoryState>,
    online: AtomicBool,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RepositoryState::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate the datastore going away (`false`) or coming back (`true`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), StorageError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("datastore is offline".to_string()))
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: Task) -> Result<Task, StorageError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        if state.index.contains_key(&task.id) {
            return Err(StorageError::Duplicate(task.id));
        }
        let position = state.rows.len();
        state.index.insert(task.id, position);
        state.rows.push(task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state.index.get(&id).map(|&i| state.rows[i].clone()))
    }

    async fn list(
        &self,
        filter: TaskFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Task>, StorageError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|task| filter.matches(task))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: TaskFilter) -> Result<usize, StorageError> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state.rows.iter().filter(|task| filter.matches(task)).count())
    }

    async fn update(&self, task: Task, expected: TaskStatus) -> Result<Task, StorageError> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        let Some(&position) = state.index.get(&task.id) else {
            return Err(StorageError::Missing(task.id));
        };
        let row = &mut state.rows[position];
        if row.status != expected {
            return Err(StorageError::StaleRecord {
                id: task.id,
                expected,
                actual: row.status,
            });
        }
        *row = task.clone();
        Ok(task)
    }
}
