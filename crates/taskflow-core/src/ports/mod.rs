//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（datastore, message broker）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - datastore が source of truth（正本）
//! - broker は配送キュー（task_id のみ）
//! - ハンドルは起動時に構築してコンストラクタに渡す（グローバルは持たない）

pub mod broker;
pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod task_repository;

pub use self::broker::{Broker, Consumer, Delivery, MessageProperties, QueueTopology};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::WorkExecutor;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_repository::{TaskFilter, TaskRepository};
