//! trawl-core
//!
//! Runtime core of a crawler.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, outcome, decision, events, errors）
//! - **ports**: 外部コラボレータへの抽象化レイヤー（Fetcher, ParserRegistry, ScopePolicy, Clock など）
//! - **impls**: ports の標準実装（AllowAll, HostLaneResolver など）
//! - **queue**: Frontier, SeenStore, RetryBuffer, DeadLetterQueue
//! - **politeness**: lane ごとの間隔制御
//! - **persistence**: WAL, snapshot, bootstrap
//! - **inflight**: WAL に裏付けられた in-flight 集合
//! - **routing**: route 解決と pipeline
//! - **app**: 設定、RunContext、scheduler、worker

pub mod app;
pub mod domain;
pub mod impls;
pub mod inflight;
pub mod persistence;
pub mod politeness;
pub mod ports;
pub mod queue;
pub mod routing;

mod serde_ext;

#[cfg(test)]
pub(crate) mod testkit;

pub use app::{Collaborators, RunConfig, RunContext, WorkerGroup};
pub use domain::{CrawlError, ProcessingTask, TaskId};
