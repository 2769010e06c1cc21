//! taskflow-core
//!
//! Asynchronous task processing: an HTTP API records tasks in a datastore and
//! publishes their ids to a durable priority queue; workers consume the queue
//! and drive each task through its lifecycle.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, priority, status machine, task, message, errors）
//! - **ports**: 抽象化レイヤー（TaskRepository, Broker, WorkExecutor, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（task_store, gateway, service, worker_loop）
//! - **impls**: 実装（InMemoryTaskRepository, InMemoryBroker, SimulatedWork）
//! - **api**: HTTP（axum）
//! - **config / builder / observability**: 起動まわり

pub mod api;
pub mod app;
pub mod builder;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use self::builder::{App, AppBuilder};
pub use self::config::{ConfigError, Settings};
