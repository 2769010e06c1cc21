//! App - ユースケース層
//!
//! - **TaskStore**: 状態遷移ガード付きの永続化
//! - **QueueGateway**: task_id を broker に publish
//! - **TaskService**: API 側（submit / cancel / 参照）
//! - **WorkerLoop / WorkerGroup**: consume → process → ack

pub mod gateway;
pub mod pagination;
pub mod service;
pub mod task_store;
pub mod worker_loop;

pub use self::gateway::QueueGateway;
pub use self::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, PageRequest};
pub use self::service::{TaskService, TaskStatusView};
pub use self::task_store::TaskStore;
pub use self::worker_loop::{
    Discard, Disposition, MessageHandler, Processed, WorkerConfig, WorkerGroup, WorkerLoop,
};
