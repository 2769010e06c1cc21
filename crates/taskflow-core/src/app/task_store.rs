//! TaskStore - 状態遷移ガード付きの永続化ファサード
//!
//! # フロー（transition）
//! 1. 呼び出し側の snapshot で edge を検証
//! 2. field updates を target status に対して検証
//! 3. repository の条件付き update（保存済み status が snapshot と一致する時だけ）
//! 4. 一致しなければ「先に誰かが遷移させた」→ InvalidTransition

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::{
    InvalidTransition, NewTask, StorageError, Task, TaskError, TaskId, TaskPriority, TaskStatus,
    TaskUpdate,
};
use crate::ports::{Clock, IdGenerator, SystemClock, TaskFilter, TaskRepository, UlidGenerator};

/// The only mutator of Task records.
pub struct TaskStore {
    repo: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskStore {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { repo, clock, ids }
    }

    /// Wall clock + ULID ids.
    pub fn with_system_clock(repo: Arc<dyn TaskRepository>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::new(repo, clock, ids)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a task in status NEW.
    pub async fn create(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        priority: TaskPriority,
    ) -> Result<Task, TaskError> {
        let input = NewTask::new(name, description, priority)?;
        let task = Task::new(self.ids.generate_task_id(), input, self.clock.now());
        let task = self.repo.insert(task).await?;
        info!(task_id = %task.id, priority = %task.priority, "task created");
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
        Ok(self.repo.get(id).await?)
    }

    /// Tasks in insertion order, optionally filtered by status.
    pub async fn list(
        &self,
        offset: usize,
        limit: usize,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, TaskError> {
        Ok(self.repo.list(TaskFilter { status }, offset, limit).await?)
    }

    pub async fn count(&self, status: Option<TaskStatus>) -> Result<usize, TaskError> {
        Ok(self.repo.count(TaskFilter { status }).await?)
    }

    /// Move `task` to `to`, applying `update` atomically with the status change.
    ///
    /// Fails with `TaskError::InvalidTransition` when `task.status -> to` is not
    /// an edge, or when the stored row has already left `task.status`.
    pub async fn transition(
        &self,
        task: &Task,
        to: TaskStatus,
        update: TaskUpdate,
    ) -> Result<Task, TaskError> {
        let from = task.status;
        from.transition_to(to)?;
        update.check_for(to)?;

        let mut next = task.clone();
        update.apply(&mut next, to, self.clock.now());

        match self.repo.update(next, from).await {
            Ok(updated) => {
                debug!(task_id = %updated.id, %from, %to, "task transitioned");
                Ok(updated)
            }
            Err(StorageError::StaleRecord { actual, .. }) => {
                debug!(task_id = %task.id, %from, %actual, %to, "transition lost to a concurrent writer");
                Err(InvalidTransition { from: actual, to }.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskRepository;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use rstest::rstest;
    use TaskStatus::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn store() -> (TaskStore, Arc<InMemoryTaskRepository>) {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(fixed_now()));
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        (TaskStore::new(repo.clone(), clock, ids), repo)
    }

    /// Drive a fresh task to `status` along valid edges.
    async fn task_in(store: &TaskStore, status: TaskStatus) -> Task {
        let task = store.create("T", None, TaskPriority::Medium).await.unwrap();
        let path: &[TaskStatus] = match status {
            New => &[],
            Pending => &[Pending],
            InProgress => &[Pending, InProgress],
            Completed => &[Pending, InProgress, Completed],
            Failed => &[Pending, Failed],
            Cancelled => &[Cancelled],
        };
        let mut task = task;
        for &step in path {
            task = store.transition(&task, step, TaskUpdate::none()).await.unwrap();
        }
        task
    }

    #[tokio::test]
    async fn create_sets_new_and_created_at() {
        let (store, _) = store();
        let task = store
            .create("T1", Some("desc".into()), TaskPriority::High)
            .await
            .unwrap();

        assert_eq!(task.status, New);
        assert_eq!(task.created_at, fixed_now());
        assert_eq!(task.description.as_deref(), Some("desc"));
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(task.result.is_none());
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (store, _) = store();
        let task = store.create("T1", None, TaskPriority::Low).await.unwrap();

        let fetched = store.get(task.id).await.unwrap();
        assert_eq!(fetched, Some(task));
    }

    #[tokio::test]
    async fn create_rejects_blank_name() {
        let (store, _) = store();
        let err = store.create("", None, TaskPriority::Low).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn create_surfaces_storage_errors() {
        let (store, repo) = store();
        repo.set_online(false);
        let err = store.create("T1", None, TaskPriority::Low).await.unwrap_err();
        assert!(matches!(err, TaskError::Storage(StorageError::Unavailable(_))));
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let (store, _) = store();
        assert!(store.get(TaskId::random()).await.unwrap().is_none());
    }

    #[rstest]
    #[case(New, New)]
    #[case(New, InProgress)]
    #[case(New, Completed)]
    #[case(New, Failed)]
    #[case(Pending, Pending)]
    #[case(Pending, Completed)]
    #[case(Pending, New)]
    #[case(InProgress, InProgress)]
    #[case(InProgress, Cancelled)]
    #[case(InProgress, Pending)]
    #[case(Completed, Failed)]
    #[case(Completed, Completed)]
    #[case(Failed, Pending)]
    #[case(Cancelled, Pending)]
    #[case(Cancelled, Cancelled)]
    #[tokio::test]
    async fn disallowed_transitions_fail(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        let (store, _) = store();
        let task = task_in(&store, from).await;

        let err = store
            .transition(&task, to, TaskUpdate::none())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskError::InvalidTransition(InvalidTransition { from: f, to: t }) if f == from && t == to
        ));
        let stored = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, from);
    }

    #[tokio::test]
    async fn full_lifecycle_sets_fields() {
        let (store, _) = store();
        let task = task_in(&store, Pending).await;

        let running = store
            .transition(&task, InProgress, TaskUpdate::started(fixed_now()))
            .await
            .unwrap();
        assert_eq!(running.started_at, Some(fixed_now()));
        assert!(running.completed_at.is_none());

        let done = store
            .transition(&running, Completed, TaskUpdate::completed(fixed_now(), "ok"))
            .await
            .unwrap();
        assert_eq!(done.status, Completed);
        assert_eq!(done.completed_at, Some(fixed_now()));
        assert_eq!(done.result.as_deref(), Some("ok"));
        assert!(done.error.is_none());
        assert_eq!(store.get(task.id).await.unwrap(), Some(done));
    }

    #[tokio::test]
    async fn mismatched_fields_are_rejected() {
        let (store, _) = store();
        let task = task_in(&store, InProgress).await;

        let err = store
            .transition(&task, Completed, TaskUpdate::failed(fixed_now(), "boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn stale_snapshot_loses_the_race() {
        let (store, _) = store();
        let pending = task_in(&store, Pending).await;

        // Worker A wins.
        store
            .transition(&pending, InProgress, TaskUpdate::started(fixed_now()))
            .await
            .unwrap();

        // Worker B still holds the PENDING snapshot.
        let err = store
            .transition(&pending, InProgress, TaskUpdate::started(fixed_now()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::InvalidTransition(InvalidTransition {
                from: InProgress,
                to: InProgress
            })
        ));

        // A late cancel with the same snapshot fails too.
        let err = store
            .transition(&pending, Cancelled, TaskUpdate::none())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn list_filters_and_counts() {
        let (store, _) = store();
        task_in(&store, New).await;
        task_in(&store, Pending).await;
        task_in(&store, Pending).await;

        assert_eq!(store.count(None).await.unwrap(), 3);
        assert_eq!(store.count(Some(Pending)).await.unwrap(), 2);
        assert_eq!(store.list(0, 10, Some(Pending)).await.unwrap().len(), 2);
        assert_eq!(store.list(1, 1, None).await.unwrap().len(), 1);
    }
}
