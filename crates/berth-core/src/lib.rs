//! berth-core
//!
//! プロセスのデータモデルとレジストリストア。
//! コンテナ操作や HTTP 層はこのクレートに依存するが、逆方向の依存はない。

pub mod error;
pub mod model;
pub mod store;

pub use error::{CoreError, Result};
pub use model::*;
pub use store::{ProcessStore, Registry};
