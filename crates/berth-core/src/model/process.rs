use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 初回起動前のコンテナID
pub const PENDING_CONTAINER_ID: &str = "pending";

const MAX_NAME_LEN: usize = 63;

/// ランタイムテンプレートの種別
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Python,
    #[serde(alias = "node")]
    Nodejs,
    Php,
    Minecraft,
    #[serde(untagged)]
    Other(String),
}

impl ProcessType {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessType::Python => "python",
            ProcessType::Nodejs => "nodejs",
            ProcessType::Php => "php",
            ProcessType::Minecraft => "minecraft",
            ProcessType::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for ProcessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "python" => ProcessType::Python,
            "nodejs" | "node" => ProcessType::Nodejs,
            "php" => ProcessType::Php,
            "minecraft" => ProcessType::Minecraft,
            other => ProcessType::Other(other.to_string()),
        })
    }
}

/// 管理対象プロセス
///
/// `name` はディレクトリ名・compose サービス名・compose プロジェクト名を兼ねる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,

    /// コンテナID（初回起動まで `"pending"`）
    pub id: String,

    #[serde(rename = "type")]
    pub process_type: ProcessType,

    /// コンテナ内で実行するフォアグラウンドコマンド
    pub command: String,

    #[serde(default)]
    pub dependencies: Vec<String>,

    pub file_location: PathBuf,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// 割り当てポートのオフセット（実ポート = base_port + port_id）
    pub port_id: u32,

    /// 監視対象コマンドの最後に観測したコンテナ内PID
    #[serde(default)]
    pub process_pid: Option<u32>,

    pub owner_id: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Process {
    pub fn new(
        name: impl Into<String>,
        process_type: ProcessType,
        command: impl Into<String>,
        file_location: impl Into<PathBuf>,
        owner_id: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            id: PENDING_CONTAINER_ID.to_string(),
            process_type,
            command: command.into(),
            dependencies: Vec::new(),
            file_location: file_location.into(),
            description: String::new(),
            domain: None,
            port_id: 0,
            process_pid: None,
            owner_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn port(&self, base_port: u16) -> u16 {
        base_port.saturating_add(self.port_id.min(u16::MAX as u32) as u16)
    }

    pub fn is_pending(&self) -> bool {
        self.id == PENDING_CONTAINER_ID
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// プロセス名を検証する
///
/// 名前はそのままパス要素・compose プロジェクト名になるため、
/// `^[a-z0-9][a-z0-9_-]{0,62}$` に一致するものだけを受け付ける。
pub fn validate_process_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CoreError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("空の名前"));
    };
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("長すぎます"));
    }
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(invalid("先頭文字が不正です"));
    }
    if let Some(c) =
        chars.find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
    {
        return Err(invalid(&format!("使用できない文字 '{}'", c)));
    }
    Ok(())
}
