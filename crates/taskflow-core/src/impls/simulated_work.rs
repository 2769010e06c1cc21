//! SimulatedWork - placeholder work function.
//!
//! Sleeps `max(1, 10 - 2 * weight)` time units: HIGH=4, MEDIUM=6, LOW=8.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{ExecutionError, Task, TaskPriority};
use crate::ports::WorkExecutor;

pub const RESULT_SUMMARY: &str = "Task processed successfully";

/// Number of time units a task of `priority` takes.
pub fn work_units(priority: TaskPriority) -> u32 {
    let units = 10 - 2 * i32::from(priority.weight());
    units.max(1) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct SimulatedWork {
    unit: Duration,
}

impl SimulatedWork {
    pub fn new(unit: Duration) -> Self {
        Self { unit }
    }

    pub fn duration_for(&self, priority: TaskPriority) -> Duration {
        self.unit * work_units(priority)
    }
}

#[async_trait]
impl WorkExecutor for SimulatedWork {
    async fn execute(&self, task: &Task) -> Result<String, ExecutionError> {
        let duration = self.duration_for(task.priority);
        debug!(task_id = %task.id, ?duration, "simulating work");
        tokio::time::sleep(duration).await;
        Ok(RESULT_SUMMARY.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskId};
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case::high(TaskPriority::High, 4)]
    #[case::medium(TaskPriority::Medium, 6)]
    #[case::low(TaskPriority::Low, 8)]
    fn units_shrink_with_priority(#[case] priority: TaskPriority, #[case] units: u32) {
        assert_eq!(work_units(priority), units);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_for_priority_duration() {
        let work = SimulatedWork::new(Duration::from_secs(1));
        let input = NewTask::new("T1", None, TaskPriority::High).unwrap();
        let task = Task::new(TaskId::random(), input, Utc::now());

        let start = tokio::time::Instant::now();
        let summary = work.execute(&task).await.unwrap();

        assert_eq!(summary, RESULT_SUMMARY);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }
}
