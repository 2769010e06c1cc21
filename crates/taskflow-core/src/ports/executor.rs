//! WorkExecutor port - タスクの実処理
//!
//! The worker loop owns the status transitions; an executor only does the
//! work and reports a summary or an error.

use async_trait::async_trait;

use crate::domain::{ExecutionError, Task};

#[async_trait]
pub trait WorkExecutor: Send + Sync {
    /// Run the work for `task`. Returns the `result` summary on success.
    async fn execute(&self, task: &Task) -> Result<String, ExecutionError>;
}
