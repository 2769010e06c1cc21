//! Domain model (IDs, status machine, task record, queue message, errors).

pub mod errors;
pub mod ids;
pub mod message;
pub mod priority;
pub mod status;
pub mod task;

pub use self::errors::{BrokerError, ExecutionError, StorageError, TaskError};
pub use self::ids::TaskId;
pub use self::message::TaskMessage;
pub use self::priority::{TaskPriority, UnknownPriority};
pub use self::status::{InvalidTransition, TaskStatus, UnknownStatus};
pub use self::task::{MAX_NAME_LEN, NewTask, Task, TaskUpdate};
