//! Process Status Resolver
//!
//! 状態は永続化せず、問い合わせのたびにコンテナとプロセステーブルから再評価する。
//! どの段階でもエンジンが失敗したら `Error` とし、`Running` に格上げしない。

use crate::classifier::ExecutionModel;
use crate::inspector::{Inspector, parse_env};
use crate::ps::{SearchTerms, parse_ps_aux};
use crate::script;
use berth_core::{Process, ProcessStatus};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub status: ProcessStatus,
    pub container_running: bool,
    /// 常駐モデルでプロセステーブルを確認した場合のみ
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    fn new(name: &str, status: ProcessStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            container_running: false,
            process_running: None,
            pid: None,
            error: None,
        }
    }

    fn error(name: &str, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::new(name, ProcessStatus::Error)
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

#[derive(Clone)]
pub struct StatusResolver {
    inspector: Inspector,
    container_sufficient: HashSet<String>,
}

impl StatusResolver {
    pub fn new(inspector: Inspector) -> Self {
        let container_sufficient = inspector
            .config()
            .container_sufficient_types
            .iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();
        Self {
            inspector,
            container_sufficient,
        }
    }

    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    pub async fn resolve(&self, process: &Process) -> StatusReport {
        let name = process.name.as_str();

        let container_id = match self.inspector.lookup_container_id(name).await {
            Ok(Some(id)) => id,
            Ok(None) => return StatusReport::new(name, ProcessStatus::Exited),
            Err(e) => return StatusReport::error(name, e.to_string()),
        };

        let info = match self.inspector.engine().inspect(&container_id).await {
            Ok(info) => info,
            Err(e) => return StatusReport::error(name, e.to_string()),
        };
        let model = ExecutionModel::from_env(&parse_env(&info.env));

        if !info.state.is_running() {
            let status = match model {
                ExecutionModel::AlwaysRunning { .. } => ProcessStatus::ContainerNotRunning,
                ExecutionModel::Traditional => ProcessStatus::Exited,
            };
            return StatusReport::new(name, status);
        }

        let mut report = StatusReport {
            container_running: true,
            ..StatusReport::new(name, ProcessStatus::Running)
        };

        let main_command = match model {
            ExecutionModel::Traditional => return report,
            ExecutionModel::AlwaysRunning { main_command } => main_command,
        };

        if self
            .container_sufficient
            .contains(&process.process_type.as_str().to_ascii_lowercase())
        {
            return report;
        }

        let terms = SearchTerms::for_status(&main_command);
        if terms.is_empty() {
            return report;
        }

        let output = match self
            .inspector
            .exec(&container_id, script::ps_aux())
            .await
        {
            Ok(out) if out.success() => out,
            Ok(out) => return StatusReport::error(name, out.diagnostic()),
            Err(e) => return StatusReport::error(name, e.to_string()),
        };

        let live = parse_ps_aux(&output.stdout)
            .into_iter()
            .filter(|row| !row.is_zombie())
            .find(|row| terms.matches(row));

        match live {
            Some(row) => {
                report.process_running = Some(true);
                report.pid = Some(row.pid);
            }
            None => {
                report.status = ProcessStatus::ProcessStopped;
                report.process_running = Some(false);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeContainer, FakeEngine, fake_config};
    use berth_core::ProcessType;
    use std::sync::Arc;

    fn process(name: &str, process_type: ProcessType) -> Process {
        Process::new(name, process_type, "node index.js", format!("/srv/{}", name), 1)
    }

    fn resolver(engine: &Arc<FakeEngine>) -> (StatusResolver, tempfile::TempDir) {
        let (config, dir) = fake_config();
        let inspector = Inspector::new(engine.clone(), config);
        (StatusResolver::new(inspector), dir)
    }

    #[tokio::test]
    async fn test_no_container_is_exited() {
        let engine = Arc::new(FakeEngine::new());
        let (resolver, _dir) = resolver(&engine);
        let report = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(report.status, ProcessStatus::Exited);
    }

    #[tokio::test]
    async fn test_traditional_uses_container_state_only() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container("api", FakeContainer::running().with_env("COMMAND=python app.py"));
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("api", ProcessType::Python)).await;
        assert_eq!(report.status, ProcessStatus::Running);
        assert_eq!(report.process_running, None);
        assert!(engine.exec_log("api").is_empty());
    }

    #[tokio::test]
    async fn test_stopped_container() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container("api", FakeContainer::stopped());
        engine.add_container(
            "web",
            FakeContainer::stopped().with_env("MAIN_COMMAND=\"node index.js\""),
        );
        let (resolver, _dir) = resolver(&engine);

        let api = resolver.resolve(&process("api", ProcessType::Python)).await;
        assert_eq!(api.status, ProcessStatus::Exited);

        let web = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(web.status, ProcessStatus::ContainerNotRunning);
        assert_eq!(web.status.for_display(), ProcessStatus::Exited);
    }

    #[tokio::test]
    async fn test_always_running_with_live_command() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container(
            "web",
            FakeContainer::running()
                .with_env("MAIN_COMMAND=\"node index.js\"")
                .with_process(12, 1, "node index.js"),
        );
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(report.status, ProcessStatus::Running);
        assert_eq!(report.pid, Some(12));
        assert_eq!(report.process_running, Some(true));
    }

    #[tokio::test]
    async fn test_crashed_command_in_live_container_is_process_stopped() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container(
            "web",
            FakeContainer::running()
                .with_env("MAIN_COMMAND=\"node index.js\"")
                .with_zombie(12, 1, "node index.js"),
        );
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(report.status, ProcessStatus::ProcessStopped);
        assert!(report.container_running);
        assert_eq!(report.process_running, Some(false));
    }

    #[tokio::test]
    async fn test_container_sufficient_type() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container(
            "bot",
            FakeContainer::running().with_env("MAIN_COMMAND=\"python bot.py\""),
        );
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("bot", ProcessType::Python)).await;
        assert_eq!(report.status, ProcessStatus::Running);
        assert!(engine.exec_log("bot").is_empty());
    }

    #[tokio::test]
    async fn test_empty_main_command_trusts_container() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container("web", FakeContainer::running().with_env("MAIN_COMMAND=\"\""));
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(report.status, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn test_engine_failure_is_error_not_running() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container("web", FakeContainer::running());
        engine.fail_lookups("Cannot connect to the Docker daemon");
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(report.status, ProcessStatus::Error);
        assert!(
            report
                .error
                .unwrap()
                .contains("Cannot connect to the Docker daemon")
        );
    }

    #[tokio::test]
    async fn test_ps_failure_is_error() {
        let engine = Arc::new(FakeEngine::new());
        engine.add_container(
            "web",
            FakeContainer::running()
                .with_env("MAIN_COMMAND=\"node index.js\"")
                .without_ps(),
        );
        let (resolver, _dir) = resolver(&engine);

        let report = resolver.resolve(&process("web", ProcessType::Nodejs)).await;
        assert_eq!(report.status, ProcessStatus::Error);
        assert!(report.error.is_some());
    }
}
