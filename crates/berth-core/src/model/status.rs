use serde::{Deserialize, Serialize};

/// 正規化されたプロセス状態
///
/// 永続化されず、問い合わせのたびに再評価される。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessStatus {
    Running,
    Exited,
    #[serde(rename = "Process Stopped")]
    ProcessStopped,
    #[serde(rename = "Container Not Running")]
    ContainerNotRunning,
    Error,
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "Running",
            ProcessStatus::Exited => "Exited",
            ProcessStatus::ProcessStopped => "Process Stopped",
            ProcessStatus::ContainerNotRunning => "Container Not Running",
            ProcessStatus::Error => "Error",
            ProcessStatus::Unknown => "Unknown",
        }
    }

    /// 表示用の状態（`Container Not Running` は `Exited` として表示する）
    pub fn for_display(self) -> Self {
        match self {
            ProcessStatus::ContainerNotRunning => ProcessStatus::Exited,
            other => other,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
