//! Errors - エラー型と分類
//!
//! - `TaskError`: what API / worker callers branch on
//! - `StorageError`: failures of the storage port
//! - `BrokerError`: failures of the broker port
//! - `ExecutionError`: the work function itself failed

use std::time::Duration;

use thiserror::Error;

use super::ids::TaskId;
use super::status::{InvalidTransition, TaskStatus};

/// Errors surfaced by the Task Store and the task service.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Bad input shape or values. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The requested status change is not an edge of the state machine
    /// (or another writer got there first).
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Cancel requested for a task that is already past the cancellable states.
    #[error("cannot cancel task {id} in status {status}")]
    NotCancellable { id: TaskId, status: TaskStatus },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Storage port errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The datastore cannot be reached.
    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    /// Conditional update lost: the row is no longer in the expected status.
    #[error("task {id} is {actual}, expected {expected}")]
    StaleRecord {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("task {0} already exists")]
    Duplicate(TaskId),

    #[error("task {0} does not exist")]
    Missing(TaskId),
}

/// Broker port errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Broker unreachable (connect / publish refused).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// An established connection went away.
    #[error("connection lost")]
    ConnectionLost,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("queue '{0}' is not declared")]
    QueueNotDeclared(String),

    /// Re-declaring a queue with different arguments.
    #[error("queue '{queue}' already declared with different arguments: {reason}")]
    TopologyMismatch { queue: String, reason: String },

    /// ack/nack on a delivery whose channel is gone.
    #[error("delivery {0} is no longer acknowledgeable")]
    UnknownDelivery(u64),

    #[error("message encoding failed: {0}")]
    Encoding(String),

    /// Malformed connection target. Retrying cannot fix this.
    #[error("invalid broker target: {0}")]
    InvalidTarget(String),
}

impl BrokerError {
    /// Errors that reconnecting cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::InvalidTarget(_))
    }
}

/// The task's own work failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
