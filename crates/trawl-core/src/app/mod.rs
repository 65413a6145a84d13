//! App - アプリケーション層
//!
//! stores と ports を組み合わせて crawl を実行します。
//!
//! # 主要コンポーネント
//! - **RunConfig**: TOML 設定
//! - **RunContext**: 共有 store、policy、collaborator
//! - **scheduler**: 1 タスク分のループ本体（`tick`）と `run_until_drained`
//! - **WorkerGroup**: N 個の worker loop と housekeeping、協調的 shutdown
//! - **status**: カウンタ

pub mod config;
pub mod context;
pub mod scheduler;
pub mod status;
pub mod worker_group;

pub use self::config::RunConfig;
pub use self::context::{Collaborators, RunContext};
pub use self::scheduler::{run_until_drained, tick, TickOutcome};
pub use self::status::{RunCounts, RunStats};
pub use self::worker_group::WorkerGroup;
