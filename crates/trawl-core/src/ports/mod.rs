//! Ports - 抽象化レイヤー
//!
//! runtime core の外側にある collaborator とのインターフェースを定義します。
//! 各 trait は外部の関心事（通信、parse、scope、時刻、ID 採番）を隠蔽し、
//! テストでは scheduler を決定的に動かせるようにします。

pub mod clock;
pub mod fetcher;
pub mod id_generator;
pub mod lane;
pub mod parser;
pub mod scope;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::fetcher::{FetchError, FetchedContent, Fetcher};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lane::LaneKeyResolver;
pub use self::parser::{ParseError, ParsedDocument, ParserRegistry};
pub use self::scope::ScopePolicy;
