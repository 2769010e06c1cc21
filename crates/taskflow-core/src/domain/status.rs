//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Task status.
///
/// State transitions:
/// - New -> Pending -> InProgress -> Completed
/// - New -> Pending -> InProgress -> Failed
/// - Pending -> Failed (publish failed)
/// - New | Pending -> Cancelled
///
/// Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet handed to the queue.
    New,

    /// Published, waiting for a worker.
    Pending,

    /// A worker is executing it.
    InProgress,

    Completed,

    Failed,

    Cancelled,
}

/// A status change that is not an edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::New,
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Statuses reachable from `self` in one step.
    pub fn successors(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::New => &[TaskStatus::Pending, TaskStatus::Cancelled],
            TaskStatus::Pending => &[
                TaskStatus::InProgress,
                TaskStatus::Cancelled,
                TaskStatus::Failed,
            ],
            TaskStatus::InProgress => &[TaskStatus::Completed, TaskStatus::Failed],
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        self.successors().contains(&to)
    }

    /// Validate one step of the state machine.
    pub fn transition_to(self, to: TaskStatus) -> Result<TaskStatus, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// Can the API still cancel a task in this state?
    pub fn is_cancellable(self) -> bool {
        self.can_transition_to(TaskStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::New => "NEW",
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Returned when a status string does not name a known status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
