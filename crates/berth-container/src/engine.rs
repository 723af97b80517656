//! コンテナエンジンとの境界
//!
//! docker に触れるのはこのトレイトの実装だけ。compose 操作はプロジェクト
//! ディレクトリを毎回明示的に渡し、プロセス全体のカレントディレクトリは変更しない。

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::path::PathBuf;

/// compose プロジェクト（= 1プロセス）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub name: String,
    pub dir: PathBuf,
}

impl ComposeProject {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// inspect の結果のうち必要な部分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectInfo {
    pub state: ContainerState,
    /// コンテナのメインプロセスのホスト側PID（停止中は None）
    pub pid: Option<u32>,
    /// `KEY=VALUE` 形式の環境変数
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// エラー表示用の出力（stderr が空なら stdout）
    pub fn diagnostic(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().to_string()
    }
}

/// エンジンのグローバルイベント
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEvent {
    /// `container`, `network`, `image` など
    pub kind: String,
    pub action: String,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

impl EngineEvent {
    pub fn is_container(&self) -> bool {
        self.kind == "container"
    }
}

pub type LineStream = BoxStream<'static, Result<String>>;
pub type EventStream = BoxStream<'static, Result<EngineEvent>>;

pub fn sh(script: impl Into<String>) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.into()]
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// `compose ps -a -q`: プロジェクトのコンテナID（無ければ None）
    async fn compose_container_id(&self, project: &ComposeProject) -> Result<Option<String>>;

    async fn compose_up(&self, project: &ComposeProject) -> Result<()>;

    async fn compose_stop(&self, project: &ComposeProject) -> Result<()>;

    async fn compose_down(&self, project: &ComposeProject) -> Result<()>;

    /// 直近 `tail` 行の compose ログ
    async fn compose_logs(&self, project: &ComposeProject, tail: usize) -> Result<Vec<String>>;

    /// `compose logs -f --tail <tail>`: 直近 `tail` 行に続けてライブ出力を流す。
    /// 1つのログ取得プロセスで履歴と追従を賄うので、境界で行が重複も欠落もしない。
    /// ストリームを破棄するとログ取得プロセスも終了する
    async fn follow_compose_logs(&self, project: &ComposeProject, tail: usize)
    -> Result<LineStream>;

    async fn inspect(&self, container_id: &str) -> Result<InspectInfo>;

    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecOutput>;

    /// `exec -d` 相当。起動したコマンドの終了は待たない
    async fn exec_detached(&self, container_id: &str, cmd: Vec<String>) -> Result<()>;

    async fn events(&self) -> Result<EventStream>;
}
