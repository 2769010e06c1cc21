//! TaskMessage - キューに流す最小の参照
//!
//! The queue only carries the task id. Status and payload live in the store.

use serde::{Deserialize, Serialize};

use super::errors::BrokerError;
use super::ids::TaskId;

/// Body of a queue message: `{"task_id": "<uuid>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
}

impl TaskMessage {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::Encoding(e.to_string()))
    }

    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}
