//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTaskRepository**: 開発用の datastore
//! - **InMemoryBroker**: 開発用の durable priority queue
//! - **SimulatedWork**: priority に比例した sleep

pub mod inmem_broker;
pub mod inmem_repository;
pub mod simulated_work;

pub use self::inmem_broker::InMemoryBroker;
pub use self::inmem_repository::InMemoryTaskRepository;
pub use self::simulated_work::{SimulatedWork, work_units};
