//! berth のプロセス実行制御
//!
//! compose プロジェクト1つを1プロセスとして扱い、状態の判定・起動停止・
//! ログ配信・エンジンイベントの通知を行う。docker に触れるのは
//! [`ContainerEngine`] の実装だけ。

pub mod cache;
pub mod classifier;
pub mod command;
pub mod docker;
pub mod engine;
pub mod error;
pub mod events;
pub mod inspector;
pub mod leader;
pub mod lifecycle;
pub mod logs;
pub mod port;
pub mod provision;
pub mod ps;
pub mod resolver;
pub mod scaffold;
pub(crate) mod script;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use classifier::{Classified, ExecutionModel, classify, is_always_running};
pub use command::ExecOutcome;
pub use docker::DockerEngine;
pub use engine::{ComposeProject, ContainerEngine, ContainerState, EngineEvent, ExecOutput};
pub use error::{ContainerError, Result};
pub use events::{EventDecision, EventDeduplicator, EventListener};
pub use inspector::Inspector;
pub use leader::{LeaderLock, run_with_election};
pub use lifecycle::{Controller, ProcessListing, StartOutcome, StopOutcome};
pub use logs::{LiveLogHub, LiveSubscription, LogStreamer};
pub use provision::{AddOutcome, NewProcess};
pub use resolver::{StatusReport, StatusResolver};
