//! berth の設定
//!
//! YAML 形式。すべての項目にデフォルト値があり、設定ファイルが無くても動作する。

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "BERTH_CONFIG_PATH";
const CANDIDATES: [&str; 2] = ["berth.local.yaml", "berth.yaml"];

/// パネル全体の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// HTTP サーバーの待ち受けアドレス
    pub bind: String,
    /// プロセスディレクトリの親
    pub servers_dir: PathBuf,
    pub state_file: PathBuf,
    /// compose の呼び出し方（`docker compose` / `docker-compose`）
    pub compose_command: Vec<String>,
    /// コンテナ内のアプリケーションディレクトリ
    pub app_dir: String,
    /// コンテナ内ログファイルのパス。`{name}` がプロセス名に置換される
    pub log_file_template: String,
    pub base_port: u16,
    pub history_lines: usize,
    pub poll_interval_ms: u64,
    pub keepalive_secs: u64,
    pub start_settle_secs: u64,
    pub exec_timeout_secs: u64,
    pub dedup_window_secs: u64,
    pub dedup_capacity: usize,
    pub status_cache_ttl_secs: u64,
    pub live_log_capacity: usize,
    /// コンテナが起動していれば Running とみなすランタイム種別
    pub container_sufficient_types: Vec<String>,
    /// 停止時にホスト側のポート占有プロセスも回収するか
    pub reap_host_listeners: bool,
    pub leader_lock: LeaderLockConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderLockConfig {
    pub path: PathBuf,
    pub ttl_secs: u64,
}

impl Default for LeaderLockConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./.berth/event-listener.lock"),
            ttl_secs: 60,
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:7001".to_string(),
            servers_dir: PathBuf::from("./active-servers"),
            state_file: PathBuf::from("./.berth/state.json"),
            compose_command: vec!["docker".to_string(), "compose".to_string()],
            app_dir: "/app".to_string(),
            log_file_template: "/tmp/{name}_process.log".to_string(),
            base_port: 8000,
            history_lines: 150,
            poll_interval_ms: 80,
            keepalive_secs: 15,
            start_settle_secs: 2,
            exec_timeout_secs: 30,
            dedup_window_secs: 30,
            dedup_capacity: 1024,
            status_cache_ttl_secs: 3,
            live_log_capacity: 256,
            container_sufficient_types: vec!["python".to_string()],
            reap_host_listeners: false,
            leader_lock: LeaderLockConfig::default(),
        }
    }
}

impl PanelConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        // 空ファイルは null になるためデフォルト扱い
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: PanelConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.compose_command.is_empty() {
            return Err(ConfigError::Invalid(
                "compose_command が空です".to_string(),
            ));
        }
        if !self.log_file_template.contains("{name}") {
            return Err(ConfigError::Invalid(format!(
                "log_file_template に {{name}} が含まれていません: {}",
                self.log_file_template
            )));
        }
        if self.dedup_capacity == 0 || self.live_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dedup_capacity / live_log_capacity は 1 以上にしてください".to_string(),
            ));
        }
        Ok(())
    }

    /// 環境変数による上書き（BERTH_BIND, BERTH_SERVERS_DIR）
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("BERTH_BIND") {
            self.bind = bind;
        }
        if let Ok(dir) = std::env::var("BERTH_SERVERS_DIR") {
            self.servers_dir = PathBuf::from(dir);
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind '{}': {}", self.bind, e)))
    }

    pub fn process_dir(&self, name: &str) -> PathBuf {
        self.servers_dir.join(name)
    }

    pub fn log_file_for(&self, name: &str) -> String {
        self.log_file_template.replace("{name}", name)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_secs(self.start_settle_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }

    pub fn leader_ttl(&self) -> Duration {
        Duration::from_secs(self.leader_lock.ttl_secs)
    }
}

/// berth の設定ディレクトリ（~/.config/berth）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("berth");
    Ok(config_dir)
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 BERTH_CONFIG_PATH（存在しなければエラー）
/// 2. カレントディレクトリ: berth.local.yaml, berth.yaml
/// 3. ./.berth/ ディレクトリ内: 同様の順序
/// 4. ~/.config/berth/berth.yaml
///
/// どこにも無い場合は `Ok(None)`。
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;
    let search_dirs = [current_dir.clone(), current_dir.join(".berth")];

    for dir in &search_dirs {
        for filename in &CANDIDATES {
            let path = dir.join(filename);
            if path.is_file() {
                return Ok(Some(path));
            }
        }
    }

    if let Ok(config_dir) = get_config_dir() {
        let global_config = config_dir.join("berth.yaml");
        if global_config.is_file() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}

/// 設定を読み込み、環境変数の上書きを適用する
pub fn load() -> Result<PanelConfig> {
    let mut config = match find_config_file()? {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            PanelConfig::from_file(&path)?
        }
        None => {
            tracing::debug!("No config file found, using defaults");
            PanelConfig::default()
        }
    };
    config.apply_env_overrides();
    Ok(config)
}
