//! Queue - frontier、重複排除、retry、dead letter
//!
//! すべての store は内部で同期しており、`.await` をまたいで lock を保持しない。
//! worker 間では `Arc` で共有する。

mod dead_letter;
mod frontier;
mod retry;
mod seen;

pub use dead_letter::{DeadLetterEntry, DeadLetterLog, DeadLetterQueue};
pub use frontier::Frontier;
pub use retry::{RetryBuffer, RetryPolicy};
pub use seen::SeenStore;
