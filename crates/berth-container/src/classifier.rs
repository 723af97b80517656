//! Execution-Model Classifier
//!
//! `MAIN_COMMAND` 環境変数の有無で実行モデルを判定する。コンテナが無い場合は
//! 単純な従来モデル側に倒す。

use crate::engine::ContainerState;
use crate::error::Result;
use crate::inspector::{Inspector, is_minecraft_env, main_command, parse_env};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionModel {
    /// コンテナのライフサイクル = プロセスのライフサイクル
    Traditional,
    /// コンテナは常駐し、その中で `main_command` を監視する
    AlwaysRunning { main_command: String },
}

impl ExecutionModel {
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        match main_command(env) {
            Some(main_command) => ExecutionModel::AlwaysRunning { main_command },
            None => ExecutionModel::Traditional,
        }
    }

    pub fn is_always_running(&self) -> bool {
        matches!(self, ExecutionModel::AlwaysRunning { .. })
    }
}

/// 判定に使ったコンテナ情報
#[derive(Debug, Clone)]
pub struct Classified {
    pub container_id: String,
    pub state: ContainerState,
    pub env: HashMap<String, String>,
    pub model: ExecutionModel,
}

impl Classified {
    pub fn is_minecraft(&self) -> bool {
        is_minecraft_env(&self.env)
    }
}

/// コンテナを引いて判定する。コンテナが無ければ `Ok(None)`
pub async fn classify(inspector: &Inspector, name: &str) -> Result<Option<Classified>> {
    let Some(container_id) = inspector.lookup_container_id(name).await? else {
        return Ok(None);
    };
    let info = inspector.engine().inspect(&container_id).await?;
    let env = parse_env(&info.env);
    let model = ExecutionModel::from_env(&env);
    Ok(Some(Classified {
        container_id,
        state: info.state,
        env,
        model,
    }))
}

/// コンテナが存在し、かつ `MAIN_COMMAND` を持つときだけ true
pub async fn is_always_running(inspector: &Inspector, name: &str) -> bool {
    match classify(inspector, name).await {
        Ok(Some(c)) => c.model.is_always_running(),
        Ok(None) => false,
        Err(e) => {
            tracing::debug!("Classification of {} failed: {}", name, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeContainer, FakeEngine, fake_config};
    use std::sync::Arc;

    #[test]
    fn test_from_env() {
        let env = parse_env(&["MAIN_COMMAND=\"node index.js\""]);
        assert_eq!(
            ExecutionModel::from_env(&env),
            ExecutionModel::AlwaysRunning {
                main_command: "node index.js".to_string()
            }
        );
        assert_eq!(
            ExecutionModel::from_env(&parse_env(&["COMMAND=python app.py"])),
            ExecutionModel::Traditional
        );
    }

    #[tokio::test]
    async fn test_no_container_is_traditional() {
        let engine = Arc::new(FakeEngine::new());
        let (config, _dir) = fake_config();
        let inspector = Inspector::new(engine, config);
        assert!(!is_always_running(&inspector, "web").await);
        assert!(classify(&inspector, "web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_main_command_marks_always_running() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container(
            "web",
            FakeContainer::running().with_env("MAIN_COMMAND=\"node index.js\""),
        );
        engine.add_container("api", FakeContainer::running().with_env("COMMAND=python app.py"));
        let (config, _dir) = fake_config();
        let inspector = Inspector::new(engine, config);

        assert!(is_always_running(&inspector, "web").await);
        assert!(!is_always_running(&inspector, "api").await);
    }

    #[tokio::test]
    async fn test_engine_failure_is_conservative() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container("web", FakeContainer::running().with_env("MAIN_COMMAND=node a.js"));
        engine.fail_lookups("daemon busy");
        let (config, _dir) = fake_config();
        let inspector = Inspector::new(engine, config);
        assert!(!is_always_running(&inspector, "web").await);
    }
}
