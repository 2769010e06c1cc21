//! Task record and the field updates that travel with a transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TaskError;
use super::ids::TaskId;
use super::priority::TaskPriority;
use super::status::TaskStatus;

/// Maximum length of a task name (in characters).
pub const MAX_NAME_LEN: usize = 255;

/// The unit of work tracked by the system.
///
/// Design:
/// - The Task Store is the only code that mutates a `Task`.
/// - Status changes go through `TaskStore::transition`, never by assigning `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl Task {
    /// A fresh record in status NEW.
    pub fn new(id: TaskId, input: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: input.name,
            description: input.description,
            priority: input.priority,
            status: TaskStatus::New,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Validated input for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    name: String,
    description: Option<String>,
    priority: TaskPriority,
}

impl NewTask {
    /// Validate the name (non-blank, at most `MAX_NAME_LEN` chars).
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        priority: TaskPriority,
    ) -> Result<Self, TaskError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(TaskError::Validation("name must not be empty".to_string()));
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(TaskError::Validation(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        Ok(Self {
            name: trimmed.to_string(),
            description,
            priority,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }
}

/// Field updates applied atomically with a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskUpdate {
    /// No field changes (e.g. NEW -> PENDING, -> CANCELLED).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::default()
        }
    }

    pub fn completed(at: DateTime<Utc>, result: impl Into<String>) -> Self {
        Self {
            completed_at: Some(at),
            result: Some(result.into()),
            ..Self::default()
        }
    }

    pub fn failed(at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            completed_at: Some(at),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Reject field updates that would break the record invariants for `to`.
    pub fn check_for(&self, to: TaskStatus) -> Result<(), TaskError> {
        let reject = |field: &str| -> Result<(), TaskError> {
            Err(TaskError::Validation(format!(
                "field '{field}' cannot be set when moving to {to}"
            )))
        };
        if self.started_at.is_some() && to != TaskStatus::InProgress {
            return reject("started_at");
        }
        if self.completed_at.is_some() && !matches!(to, TaskStatus::Completed | TaskStatus::Failed)
        {
            return reject("completed_at");
        }
        if self.result.is_some() && to != TaskStatus::Completed {
            return reject("result");
        }
        if self.error.is_some() && to != TaskStatus::Failed {
            return reject("error");
        }
        Ok(())
    }

    /// Apply the status change and fields to `task`, filling timestamps the
    /// target status requires from `now`.
    pub(crate) fn apply(self, task: &mut Task, to: TaskStatus, now: DateTime<Utc>) {
        task.status = to;
        match to {
            TaskStatus::InProgress => {
                task.started_at = Some(self.started_at.unwrap_or(now));
            }
            TaskStatus::Completed => {
                task.completed_at = Some(self.completed_at.unwrap_or(now));
                task.result = self.result;
            }
            TaskStatus::Failed => {
                task.completed_at = Some(self.completed_at.unwrap_or(now));
                task.error = self.error;
            }
            TaskStatus::New | TaskStatus::Pending | TaskStatus::Cancelled => {}
        }
    }
}
