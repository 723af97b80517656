//! 1回限りのコマンド実行とログ消去

use crate::classifier::{Classified, ExecutionModel, classify};
use crate::error::{ContainerError, Result};
use crate::lifecycle::Controller;
use crate::logs::stamp;
use crate::script;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use berth_core::{Process, ProcessType};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecOutcome {
    fn ok(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

impl Controller {
    async fn running_container(&self, process: &Process) -> Result<Classified> {
        match classify(&self.inspector, &process.name).await? {
            Some(c) if c.state.is_running() => Ok(c),
            _ => Err(ContainerError::ContainerNotRunning {
                name: process.name.clone(),
            }),
        }
    }

    /// コンテナ内でコマンドを実行する
    ///
    /// Minecraft サーバーではコマンドを JVM の標準入力へ送る。それ以外は `app_dir` で
    /// 実行し、出力をタイムスタンプ付きでログファイルに追記する。
    pub async fn execute(&self, process: &Process, command: &str) -> Result<ExecOutcome> {
        let name = process.name.as_str();
        let container = self.running_container(process).await?;
        let config = self.config();

        let minecraft = process.process_type == ProcessType::Minecraft || container.is_minecraft();
        let tailed_by_streamer =
            !minecraft && matches!(container.model, ExecutionModel::AlwaysRunning { .. });

        // 常駐モデルのログファイルには同じ行が書かれるため、ライブキューへは送らない
        if !tailed_by_streamer {
            self.live.push(name, stamp(&format!("$ {}", command)));
        }

        let cmd = if minecraft {
            let encoded = STANDARD.encode(format!("{}\n", command));
            script::feed_jvm_stdin(&encoded)
        } else {
            script::run_logged(&config.app_dir, &config.log_file_for(name), command)
        };

        tracing::info!("Executing in {}: {}", name, command);
        let timeout = config.exec_timeout();
        let result = tokio::time::timeout(
            timeout,
            self.inspector.exec(&container.container_id, cmd),
        )
        .await;

        let outcome = match result {
            Err(_) => ExecOutcome::failed(
                ContainerError::Timeout {
                    what: format!("コマンド '{}'", command),
                    secs: timeout.as_secs(),
                }
                .to_string(),
            ),
            Ok(Err(e)) => ExecOutcome::failed(e.to_string()),
            Ok(Ok(out)) if minecraft && out.exit_code == script::JVM_NOT_FOUND_EXIT => {
                ExecOutcome::failed("Minecraft server process (java) is not running")
            }
            Ok(Ok(out)) if out.success() => ExecOutcome::ok(out.stdout),
            Ok(Ok(out)) => ExecOutcome::failed(out.diagnostic()),
        };

        if !outcome.success {
            tracing::warn!("Command in {} failed: {:?}", name, outcome.error);
        }
        Ok(outcome)
    }

    /// コンテナ内ログファイルを空にする
    pub async fn clear_logs(&self, process: &Process) -> Result<()> {
        let name = process.name.as_str();
        let container = self.running_container(process).await?;
        let log_file = self.config().log_file_for(name);

        let out = self
            .inspector
            .exec(&container.container_id, script::truncate(&log_file))
            .await?;
        if !out.success() {
            return Err(ContainerError::command_failed(
                format!(": > {}", log_file),
                out.diagnostic(),
            ));
        }
        self.live.push_stamped(name, "Logs cleared");
        Ok(())
    }
}
