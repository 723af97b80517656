//! Container Inspector
//!
//! プロセス名から compose プロジェクトのコンテナを引き、状態と環境変数を読む。
//! 問い合わせのみで、コンテナの状態は変更しない。

use crate::engine::{ComposeProject, ContainerEngine, ContainerState, ExecOutput};
use crate::error::Result;
use berth_config::PanelConfig;
use std::collections::HashMap;
use std::sync::Arc;

pub const MAIN_COMMAND_ENV: &str = "MAIN_COMMAND";
pub const MINECRAFT_ENV: &str = "MINECRAFT_SERVER";

/// `KEY=VALUE` 行を解析する。`=` を含まない行は無視
pub fn parse_env<S: AsRef<str>>(lines: &[S]) -> HashMap<String, String> {
    lines
        .iter()
        .filter_map(|line| {
            let (key, value) = line.as_ref().split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// compose テンプレートが JSON 文字列で埋め込むため、前後の `"` を外す
pub fn main_command(env: &HashMap<String, String>) -> Option<String> {
    env.get(MAIN_COMMAND_ENV)
        .map(|v| v.trim().trim_matches('"').to_string())
}

pub fn is_minecraft_env(env: &HashMap<String, String>) -> bool {
    env.get(MINECRAFT_ENV)
        .is_some_and(|v| v.trim().trim_matches('"').eq_ignore_ascii_case("true"))
}

#[derive(Clone)]
pub struct Inspector {
    engine: Arc<dyn ContainerEngine>,
    config: Arc<PanelConfig>,
}

impl Inspector {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: Arc<PanelConfig>) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn project(&self, name: &str) -> ComposeProject {
        ComposeProject::new(name, self.config.process_dir(name))
    }

    /// コンテナIDを引く（エラーはそのまま返す）
    pub async fn lookup_container_id(&self, name: &str) -> Result<Option<String>> {
        self.engine
            .compose_container_id(&self.project(name))
            .await
    }

    /// コンテナIDを引く。失敗は None として扱う
    pub async fn get_container_id(&self, name: &str) -> Option<String> {
        match self.lookup_container_id(name).await {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!("Container lookup for {} failed: {}", name, e);
                None
            }
        }
    }

    pub async fn get_container_state(&self, container_id: &str) -> Result<ContainerState> {
        Ok(self.engine.inspect(container_id).await?.state)
    }

    pub async fn get_container_env(&self, container_id: &str) -> Result<HashMap<String, String>> {
        let info = self.engine.inspect(container_id).await?;
        Ok(parse_env(&info.env))
    }

    pub async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        self.engine.exec(container_id, cmd).await
    }
}
