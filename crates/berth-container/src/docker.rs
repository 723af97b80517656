//! docker デーモン + compose CLI による [`ContainerEngine`] 実装

use crate::engine::{
    ComposeProject, ContainerEngine, ContainerState, EngineEvent, EventStream, ExecOutput,
    InspectInfo, LineStream,
};
use crate::error::{ContainerError, Result};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use futures_util::stream::StreamExt;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::ReceiverStream;

const EVENT_BUFFER: usize = 64;

pub struct DockerEngine {
    docker: Docker,
    compose: Vec<String>,
}

impl DockerEngine {
    pub fn new(docker: Docker, compose_command: Vec<String>) -> Self {
        Self {
            docker,
            compose: compose_command,
        }
    }

    /// ローカルのデーモンに接続し、ping で疎通を確認する
    pub async fn connect(compose_command: Vec<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;
        Ok(Self::new(docker, compose_command))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    fn compose_cmd(&self, project: &ComposeProject, args: &[&str]) -> Result<Command> {
        if !project.dir.is_dir() {
            return Err(ContainerError::ProjectDirNotFound(project.dir.clone()));
        }
        let (program, base) = self
            .compose
            .split_first()
            .ok_or_else(|| ContainerError::DockerApiError("compose_command is empty".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(base)
            .arg("-p")
            .arg(&project.name)
            .args(args)
            .current_dir(&project.dir)
            .stdin(Stdio::null());

        tracing::debug!(
            "Running: {} -p {} {} (in {})",
            self.compose.join(" "),
            project.name,
            args.join(" "),
            project.dir.display()
        );
        Ok(cmd)
    }

    /// compose コマンドを実行して stdout を返す
    async fn run_compose(&self, project: &ComposeProject, args: &[&str]) -> Result<String> {
        let mut cmd = self.compose_cmd(project, args)?;
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::command_failed(
                format!("compose {}", args.join(" ")),
                stderr.trim(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn event_from_message(msg: bollard::models::EventMessage) -> EngineEvent {
    let actor = msg.actor.unwrap_or_default();
    EngineEvent {
        kind: msg.typ.map(|t| t.to_string()).unwrap_or_default(),
        action: msg.action.unwrap_or_default(),
        actor_id: actor.id.unwrap_or_default(),
        attributes: actor.attributes.unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn compose_container_id(&self, project: &ComposeProject) -> Result<Option<String>> {
        let out = self.run_compose(project, &["ps", "-a", "-q"]).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    async fn compose_up(&self, project: &ComposeProject) -> Result<()> {
        self.run_compose(project, &["up", "-d"]).await.map(|_| ())
    }

    async fn compose_stop(&self, project: &ComposeProject) -> Result<()> {
        self.run_compose(project, &["stop"]).await.map(|_| ())
    }

    async fn compose_down(&self, project: &ComposeProject) -> Result<()> {
        self.run_compose(project, &["down"]).await.map(|_| ())
    }

    async fn compose_logs(&self, project: &ComposeProject, tail: usize) -> Result<Vec<String>> {
        let tail = tail.to_string();
        let out = self
            .run_compose(project, &["logs", "--no-color", "--tail", &tail])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn follow_compose_logs(
        &self,
        project: &ComposeProject,
        tail: usize,
    ) -> Result<LineStream> {
        let tail = tail.to_string();
        let mut cmd = self.compose_cmd(project, &["logs", "--no-color", "-f", "--tail", &tail])?;
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ContainerError::DockerApiError("compose logs: no stdout".into()))?;
        let lines = BufReader::new(stdout).lines();

        // child をストリームの状態に保持し、ストリーム破棄時に kill させる
        let stream = futures_util::stream::unfold((child, lines), |(child, mut lines)| async move {
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), (child, lines))),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!("compose logs stream failed: {}", e);
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn inspect(&self, container_id: &str) -> Result<InspectInfo> {
        tracing::debug!("Inspecting container {}", container_id);
        let info = self
            .docker
            .inspect_container(
                container_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await?;

        let state = info
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| ContainerState::parse(&s.to_string()))
            .unwrap_or(ContainerState::Unknown);
        let pid = info
            .state
            .as_ref()
            .and_then(|s| s.pid)
            .filter(|pid| *pid > 0)
            .and_then(|pid| u32::try_from(pid).ok());
        let env = info.config.and_then(|c| c.env).unwrap_or_default();

        Ok(InspectInfo { state, pid, env })
    }

    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        tracing::debug!("exec in {}: {:?}", container_id, cmd);
        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let message = self.docker.create_exec(container_id, exec_config).await?;

        let mut result = ExecOutput::default();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&message.id, Some(StartExecOptions::default()))
            .await?
        {
            while let Some(msg) = output.next().await {
                match msg? {
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        result.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        result.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&message.id).await?;
        result.exit_code = inspect.exit_code.unwrap_or(0);
        Ok(result)
    }

    async fn exec_detached(&self, container_id: &str, cmd: Vec<String>) -> Result<()> {
        tracing::debug!("exec -d in {}: {:?}", container_id, cmd);
        let exec_config = CreateExecOptions {
            cmd: Some(cmd),
            ..Default::default()
        };
        let message = self.docker.create_exec(container_id, exec_config).await?;
        self.docker
            .start_exec(
                &message.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn events(&self) -> Result<EventStream> {
        let docker = self.docker.clone();
        let (tx, rx) = tokio::sync::mpsc::channel(EVENT_BUFFER);

        tokio::spawn(async move {
            let stream = docker.events(None::<bollard::query_parameters::EventsOptions>);
            let mut stream = std::pin::pin!(stream);
            while let Some(item) = stream.next().await {
                let item = item.map(event_from_message).map_err(ContainerError::from);
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_event_from_message() {
        let msg = bollard::models::EventMessage {
            typ: Some(bollard::models::EventMessageTypeEnum::CONTAINER),
            action: Some("die".to_string()),
            actor: Some(bollard::models::EventActor {
                id: Some("abc123".to_string()),
                attributes: Some(HashMap::from([(
                    "name".to_string(),
                    "web-web-1".to_string(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let event = event_from_message(msg);
        assert!(event.is_container());
        assert_eq!(event.action, "die");
        assert_eq!(event.actor_id, "abc123");
        assert_eq!(event.attributes["name"], "web-web-1");
    }

    #[test]
    fn test_event_from_empty_message() {
        let event = event_from_message(bollard::models::EventMessage::default());
        assert!(!event.is_container());
        assert!(event.action.is_empty());
    }

    #[tokio::test]
    async fn test_compose_requires_project_dir() {
        let engine = DockerEngine::new(
            Docker::connect_with_local_defaults().unwrap(),
            vec!["docker".into(), "compose".into()],
        );
        let project = ComposeProject::new("missing", "/nonexistent/berth/missing");
        let err = engine.compose_up(&project).await.unwrap_err();
        assert!(matches!(err, ContainerError::ProjectDirNotFound(_)));
    }
}
