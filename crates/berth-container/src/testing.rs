//! テスト用のスクリプト化されたコンテナエンジン
//!
//! docker デーモン無しでリゾルバ・コントローラ・ストリーマを動かすため、
//! コンテナ内で実行されるシェルコマンドを解釈してプロセステーブルとファイルを模擬する。

use crate::engine::{
    ComposeProject, ContainerEngine, ContainerState, EngineEvent, EventStream, ExecOutput,
    InspectInfo, LineStream,
};
use crate::error::{ContainerError, Result};
use crate::lifecycle::Controller;
use crate::logs::{LiveLogHub, stamp};
use crate::script::{HEREDOC_MARKER, JVM_NOT_FOUND_EXIT};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use berth_config::{LeaderLockConfig, PanelConfig};
use berth_core::{Process, ProcessStore, ProcessType};
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const INIT_COMMAND: &str = "tail -f /dev/null";
/// 起動中コンテナの inspect が返すホスト側PID
pub const FAKE_HOST_PID: u32 = 4242;

pub fn container_id(name: &str) -> String {
    format!("cid-{}", name)
}

fn name_of(container_id: &str) -> &str {
    container_id.strip_prefix("cid-").unwrap_or(container_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeProc {
    pid: u32,
    ppid: u32,
    command: String,
    zombie: bool,
}

#[derive(Debug, Clone)]
enum Launch {
    Spawn(Vec<String>),
    Crash(Vec<String>),
}

/// 模擬コンテナ
#[derive(Debug, Clone)]
pub struct FakeContainer {
    running: bool,
    env: Vec<String>,
    procs: Vec<FakeProc>,
    listeners: Vec<(u16, u32)>,
    files: HashMap<String, String>,
    ps_available: bool,
    launch: Launch,
    stdin: Vec<String>,
}

impl FakeContainer {
    /// init として `tail -f /dev/null` だけが動いているコンテナ
    pub fn running() -> Self {
        let mut container = Self::stopped();
        container.boot();
        container
    }

    pub fn stopped() -> Self {
        Self {
            running: false,
            env: Vec::new(),
            procs: Vec::new(),
            listeners: Vec::new(),
            files: HashMap::new(),
            ps_available: true,
            launch: Launch::Spawn(Vec::new()),
            stdin: Vec::new(),
        }
    }

    pub fn with_env(mut self, line: &str) -> Self {
        self.env.push(line.to_string());
        self
    }

    pub fn with_process(mut self, pid: u32, ppid: u32, command: &str) -> Self {
        self.procs.push(FakeProc {
            pid,
            ppid,
            command: command.to_string(),
            zombie: false,
        });
        self
    }

    pub fn with_zombie(mut self, pid: u32, ppid: u32, command: &str) -> Self {
        self.procs.push(FakeProc {
            pid,
            ppid,
            command: command.to_string(),
            zombie: true,
        });
        self
    }

    pub fn with_listener(mut self, port: u16, pid: u32) -> Self {
        self.listeners.push((port, pid));
        self
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    /// `ps` の無い最小イメージ
    pub fn without_ps(mut self) -> Self {
        self.ps_available = false;
        self
    }

    /// 起動スクリプトを実行すると `lines` を出力して即座に終了する
    pub fn crashing_with(mut self, lines: &[&str]) -> Self {
        self.launch = Launch::Crash(lines.iter().map(|l| l.to_string()).collect());
        self
    }

    /// 起動スクリプトを実行すると `lines` を出力して動き続ける
    pub fn launching_with(mut self, lines: &[&str]) -> Self {
        self.launch = Launch::Spawn(lines.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn env(&self) -> &[String] {
        &self.env
    }

    /// init とゾンビを除いたプロセスのコマンド
    pub fn live_commands(&self) -> Vec<String> {
        self.procs
            .iter()
            .filter(|p| !p.zombie && p.pid != 1)
            .map(|p| p.command.clone())
            .collect()
    }

    pub fn zombie_count(&self) -> usize {
        self.procs.iter().filter(|p| p.zombie).count()
    }

    fn boot(&mut self) {
        self.running = true;
        if !self.procs.iter().any(|p| p.pid == 1) {
            self.procs.insert(
                0,
                FakeProc {
                    pid: 1,
                    ppid: 0,
                    command: INIT_COMMAND.to_string(),
                    zombie: false,
                },
            );
        }
    }

    fn halt(&mut self) {
        self.running = false;
        self.procs.clear();
        self.listeners.clear();
    }

    fn next_pid(&self) -> u32 {
        self.procs.iter().map(|p| p.pid).max().unwrap_or(1).max(99) + 1
    }

    fn append(&mut self, path: &str, text: &str) {
        self.files.entry(path.to_string()).or_default().push_str(text);
    }

    fn append_lines(&mut self, path: &str, lines: &[String]) {
        for line in lines {
            self.append(path, &format!("{}\n", line));
        }
    }

    fn ps_aux(&self) -> ExecOutput {
        if !self.ps_available {
            return failed(127, "sh: ps: not found");
        }
        let mut out = String::from(
            "USER       PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND\n",
        );
        for p in &self.procs {
            let (stat, command) = if p.zombie {
                let program = p.command.split_whitespace().next().unwrap_or_default();
                ("Z", format!("[{}] <defunct>", program))
            } else {
                ("S", p.command.clone())
            };
            out.push_str(&format!(
                "root {:>8}  0.0  0.1   1000   100 ?        {:<4} 10:00   0:00 {}\n",
                p.pid, stat, command
            ));
        }
        out.push_str("root     9999  0.0  0.0   1000   100 ?        R    10:00   0:00 ps aux\n");
        ok(out)
    }

    fn ppid_table(&self) -> ExecOutput {
        let mut out = String::from("  PID  PPID\n");
        for p in &self.procs {
            out.push_str(&format!("{:>5} {:>5}\n", p.pid, p.ppid));
        }
        ok(out)
    }

    fn netstat(&self) -> ExecOutput {
        let mut out = String::from(
            "Active Internet connections (only servers)\n\
             Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name\n",
        );
        for (port, pid) in &self.listeners {
            let program = self
                .procs
                .iter()
                .find(|p| p.pid == *pid)
                .and_then(|p| p.command.split_whitespace().next())
                .unwrap_or("node");
            out.push_str(&format!(
                "tcp        0      0 0.0.0.0:{}            0.0.0.0:*               LISTEN      {}/{}\n",
                port, pid, program
            ));
        }
        ok(out)
    }

    fn lsof(&self, port: u16) -> ExecOutput {
        let out: String = self
            .listeners
            .iter()
            .filter(|(p, _)| *p == port)
            .map(|(_, pid)| format!("{}\n", pid))
            .collect();
        ok(out)
    }

    fn terminate(&mut self, pids: &[u32]) -> ExecOutput {
        let mut missing = Vec::new();
        for pid in pids {
            let before = self.procs.len();
            self.procs.retain(|p| p.pid != *pid || p.zombie);
            if self.procs.len() == before {
                missing.push(*pid);
            }
            self.listeners.retain(|(_, l)| l != pid);
        }
        if missing.is_empty() {
            ok(String::new())
        } else {
            failed(1, &format!("kill: ({:?}) - No such process", missing))
        }
    }

    fn reap_children(&mut self, parents: &[u32]) -> ExecOutput {
        self.procs
            .retain(|p| !(p.zombie && parents.contains(&p.ppid)));
        ok(String::new())
    }

    fn file_bytes(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(|s| s.as_bytes())
    }
}

fn ok(stdout: impl Into<String>) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

fn failed(exit_code: i64, stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// `marker` の直後にあるシングルクォート文字列
fn quoted_after(script: &str, marker: &str) -> Option<String> {
    let rest = &script[script.find(marker)? + marker.len()..];
    let rest = rest.strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

fn first_quoted(script: &str) -> Option<String> {
    let start = script.find('\'')? + 1;
    let end = start + script[start..].find('\'')?;
    Some(script[start..end].to_string())
}

fn number_after(script: &str, marker: &str) -> Option<u64> {
    let rest = &script[script.find(marker)? + marker.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..]
        .iter()
        .map(|l| format!("{}\n", l))
        .collect()
}

/// compose ファイルのサービス環境変数を `KEY=VALUE` の一覧で読む
fn env_from_compose(dir: &Path, service: &str) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(dir.join("docker-compose.yml")) else {
        return Vec::new();
    };
    let Ok(doc) = serde_yaml::from_str::<serde_yaml::Value>(&content) else {
        return Vec::new();
    };
    match doc
        .get("services")
        .and_then(|s| s.get(service))
        .and_then(|s| s.get("environment"))
    {
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(serde_yaml::Value::Mapping(map)) => map
            .iter()
            .filter_map(|(k, v)| Some(format!("{}={}", k.as_str()?, v.as_str()?)))
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    templates: HashMap<String, FakeContainer>,
    lookup_error: Option<String>,
    up_error: Option<String>,
    compose_logs: HashMap<String, Vec<String>>,
    follow: HashMap<String, Vec<String>>,
    events: Vec<EngineEvent>,
    exec_delay: Option<Duration>,
    outputs: HashMap<(String, String), (String, i64)>,
    exec_log: HashMap<String, Vec<Vec<String>>>,
    calls: Vec<String>,
}

/// docker の代わりに使うメモリ上のエンジン
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, name: &str, container: FakeContainer) {
        self.state
            .lock()
            .containers
            .insert(name.to_string(), container);
    }

    /// compose up で新しく作られるコンテナ
    pub fn set_template(&self, name: &str, container: FakeContainer) {
        self.state
            .lock()
            .templates
            .insert(name.to_string(), container);
    }

    pub fn fail_lookups(&self, message: &str) {
        self.state.lock().lookup_error = Some(message.to_string());
    }

    pub fn fail_up(&self, message: &str) {
        self.state.lock().up_error = Some(message.to_string());
    }

    pub fn set_compose_logs(&self, name: &str, lines: Vec<String>) {
        self.state
            .lock()
            .compose_logs
            .insert(name.to_string(), lines);
    }

    pub fn set_follow_lines(&self, name: &str, lines: Vec<String>) {
        self.state.lock().follow.insert(name.to_string(), lines);
    }

    pub fn push_event(&self, event: EngineEvent) {
        self.state.lock().events.push(event);
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        self.state.lock().exec_delay = Some(delay);
    }

    /// `execute` で実行されるコマンドの出力
    pub fn set_command_output(&self, name: &str, command: &str, output: &str) {
        self.state
            .lock()
            .outputs
            .insert((name.to_string(), command.to_string()), (output.to_string(), 0));
    }

    /// `execute` で実行されるコマンドを `exit_code` で失敗させる
    pub fn set_command_failure(&self, name: &str, command: &str, output: &str, exit_code: i64) {
        self.state.lock().outputs.insert(
            (name.to_string(), command.to_string()),
            (output.to_string(), exit_code),
        );
    }

    pub fn exec_log(&self, name: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .exec_log
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// compose 操作の履歴（`"up web"` など）
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn live_commands(&self, name: &str) -> Vec<String> {
        self.container(name)
            .map(|c| c.live_commands())
            .unwrap_or_default()
    }

    pub fn file(&self, name: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .containers
            .get(name)
            .and_then(|c| c.files.get(path).cloned())
    }

    pub fn append_file(&self, name: &str, path: &str, text: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.append(path, text);
        }
    }

    pub fn write_file(&self, name: &str, path: &str, text: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.files.insert(path.to_string(), text.to_string());
        }
    }

    /// Minecraft サーバーの標準入力に届いた行
    pub fn stdin_lines(&self, name: &str) -> Vec<String> {
        self.container(name).map(|c| c.stdin).unwrap_or_default()
    }

    fn with_container<T>(
        &self,
        container_id: &str,
        f: impl FnOnce(&mut FakeContainer) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        match state.containers.get_mut(name_of(container_id)) {
            Some(c) => f(c),
            None => Err(ContainerError::ContainerNotFound {
                container: container_id.to_string(),
            }),
        }
    }
}

fn run_script(
    c: &mut FakeContainer,
    name: &str,
    script: &str,
    outputs: &HashMap<(String, String), (String, i64)>,
) -> ExecOutput {
    if script.starts_with("ps -eo") {
        return c.ppid_table();
    }
    if script.starts_with("netstat") {
        return c.netstat();
    }
    if script.starts_with("lsof") {
        let port = number_after(script, ":").unwrap_or_default() as u16;
        return c.lsof(port);
    }
    if script.starts_with(": > ") {
        if let Some(path) = first_quoted(script) {
            c.files.insert(path, String::new());
        }
        return ok("");
    }
    if script.starts_with("stat -c %s") {
        return match first_quoted(script).and_then(|p| c.file_bytes(&p).map(<[u8]>::len)) {
            Some(size) => ok(format!("{}\n", size)),
            None => failed(1, "No such file or directory"),
        };
    }
    if script.starts_with("head -c ") {
        let size = number_after(script, "head -c ").unwrap_or_default() as usize;
        let lines = number_after(script, "tail -n ").unwrap_or_default() as usize;
        let bytes = first_quoted(script)
            .and_then(|p| c.file_bytes(&p).map(<[u8]>::to_vec))
            .unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes[..size.min(bytes.len())]).to_string();
        return ok(last_lines(&text, lines));
    }
    if script.starts_with("tail -c +") {
        let from = number_after(script, "tail -c +").unwrap_or(1).saturating_sub(1) as usize;
        let len = number_after(script, "head -c ").unwrap_or_default() as usize;
        let bytes = first_quoted(script)
            .and_then(|p| c.file_bytes(&p).map(<[u8]>::to_vec))
            .unwrap_or_default();
        let from = from.min(bytes.len());
        let to = (from + len).min(bytes.len());
        return ok(String::from_utf8_lossy(&bytes[from..to]).to_string());
    }
    if script.starts_with("tail -n ") {
        let lines = number_after(script, "tail -n ").unwrap_or_default() as usize;
        let text = first_quoted(script)
            .and_then(|p| c.files.get(&p).cloned())
            .unwrap_or_default();
        return ok(last_lines(&text, lines));
    }
    if script.starts_with("cat > ") {
        let Some(path) = first_quoted(script) else {
            return failed(1, "missing path");
        };
        let body = script
            .split_once('\n')
            .and_then(|(_, rest)| rest.split_once(&format!("\n{}\n", HEREDOC_MARKER)))
            .map(|(body, _)| body.to_string())
            .unwrap_or_default();
        c.files.insert(path, format!("{}\n", body));
        return ok("");
    }
    if script.starts_with("cd ") {
        let Some(log) = quoted_after(script, ">> ") else {
            return failed(1, "missing log path");
        };
        let command = script
            .split_once("{ { (")
            .and_then(|(_, rest)| rest.split_once(") 2>&1 3>&- 4>&-;"))
            .map(|(cmd, _)| cmd.to_string())
            .unwrap_or_default();
        let (output, exit_code) = outputs
            .get(&(name.to_string(), command.clone()))
            .cloned()
            .unwrap_or_default();
        c.append(&log, &format!("{}\n", stamp(&format!("$ {}", command))));
        for line in output.lines() {
            c.append(&log, &format!("{}\n", stamp(line)));
        }
        return ExecOutput {
            exit_code,
            stdout: output,
            stderr: String::new(),
        };
    }
    if script.starts_with("MC_PID=") {
        let has_jvm = c.procs.iter().any(|p| !p.zombie && p.command.contains("java"));
        if !has_jvm {
            return failed(JVM_NOT_FOUND_EXIT, "");
        }
        let decoded = quoted_after(script, "echo ")
            .and_then(|b64| STANDARD.decode(b64).ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).trim_end().to_string())
            .unwrap_or_default();
        c.stdin.push(decoded);
        return ok("");
    }
    ok("")
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn compose_container_id(&self, project: &ComposeProject) -> Result<Option<String>> {
        let state = self.state.lock();
        if let Some(message) = &state.lookup_error {
            return Err(ContainerError::command_failed(
                format!("docker compose -p {} ps -a -q", project.name),
                message.clone(),
            ));
        }
        Ok(state
            .containers
            .contains_key(&project.name)
            .then(|| container_id(&project.name)))
    }

    async fn compose_up(&self, project: &ComposeProject) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("up {}", project.name));
        if let Some(message) = &state.up_error {
            return Err(ContainerError::command_failed(
                format!("docker compose -p {} up -d", project.name),
                message.clone(),
            ));
        }
        if let Some(c) = state.containers.get_mut(&project.name) {
            c.boot();
            return Ok(());
        }
        let mut container = match state.templates.get(&project.name) {
            Some(template) => template.clone(),
            None => FakeContainer {
                env: env_from_compose(&project.dir, &project.name),
                ..FakeContainer::stopped()
            },
        };
        container.boot();
        state.containers.insert(project.name.clone(), container);
        Ok(())
    }

    async fn compose_stop(&self, project: &ComposeProject) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("stop {}", project.name));
        if let Some(c) = state.containers.get_mut(&project.name) {
            c.halt();
        }
        Ok(())
    }

    async fn compose_down(&self, project: &ComposeProject) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("down {}", project.name));
        state.containers.remove(&project.name);
        Ok(())
    }

    async fn compose_logs(&self, project: &ComposeProject, tail: usize) -> Result<Vec<String>> {
        let mut state = self.state.lock();
        state.calls.push(format!("logs {}", project.name));
        let lines = state
            .compose_logs
            .get(&project.name)
            .cloned()
            .unwrap_or_default();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].to_vec())
    }

    async fn follow_compose_logs(
        &self,
        project: &ComposeProject,
        tail: usize,
    ) -> Result<LineStream> {
        let mut state = self.state.lock();
        state.calls.push(format!("follow {}", project.name));
        let history = state
            .compose_logs
            .get(&project.name)
            .cloned()
            .unwrap_or_default();
        let start = history.len().saturating_sub(tail);
        let mut lines = history[start..].to_vec();
        lines.extend(
            state
                .follow
                .get(&project.name)
                .cloned()
                .unwrap_or_default(),
        );
        Ok(stream::iter(lines.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed())
    }

    async fn inspect(&self, container_id: &str) -> Result<InspectInfo> {
        self.with_container(container_id, |c| {
            Ok(InspectInfo {
                state: if c.running {
                    ContainerState::Running
                } else {
                    ContainerState::Exited
                },
                pid: c.running.then_some(FAKE_HOST_PID),
                env: c.env.clone(),
            })
        })
    }

    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecOutput> {
        let delay = self.state.lock().exec_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let name = name_of(container_id).to_string();
        state
            .exec_log
            .entry(name.clone())
            .or_default()
            .push(cmd.clone());

        let State {
            containers,
            outputs,
            ..
        } = &mut *state;
        let c = containers
            .get_mut(&name)
            .ok_or_else(|| ContainerError::ContainerNotFound {
                container: container_id.to_string(),
            })?;
        if !c.running {
            return Err(ContainerError::DockerApiError(format!(
                "container {} is not running",
                container_id
            )));
        }

        let pids = |args: &[String]| -> Vec<u32> {
            args.iter().filter_map(|a| a.parse().ok()).collect()
        };
        let out = match cmd.first().map(String::as_str) {
            Some("ps") => c.ps_aux(),
            Some("kill") => match cmd.get(1).map(String::as_str) {
                Some("-TERM") | Some("-KILL") => c.terminate(&pids(&cmd[2..])),
                Some("-CHLD") => c.reap_children(&pids(&cmd[2..])),
                _ => failed(1, "kill: bad signal"),
            },
            Some("test") => match cmd.get(2) {
                Some(path) if c.files.contains_key(path) => ok(""),
                _ => failed(1, ""),
            },
            Some("sh") => {
                let script = cmd.get(2).cloned().unwrap_or_default();
                run_script(c, &name, &script, outputs)
            }
            _ => ok(""),
        };
        Ok(out)
    }

    async fn exec_detached(&self, container_id: &str, cmd: Vec<String>) -> Result<()> {
        let mut state = self.state.lock();
        state
            .exec_log
            .entry(name_of(container_id).to_string())
            .or_default()
            .push(cmd.clone());
        drop(state);

        self.with_container(container_id, |c| {
            if !c.running {
                return Err(ContainerError::DockerApiError(format!(
                    "container {} is not running",
                    container_id
                )));
            }
            let path = cmd.get(1).cloned().unwrap_or_default();
            let body = c
                .files
                .get(&path)
                .cloned()
                .ok_or_else(|| ContainerError::command_failed(format!("sh {}", path), "not found"))?;
            let (command, log) = body
                .lines()
                .find_map(|l| l.strip_prefix("exec "))
                .and_then(|l| l.split_once(" 2>&1 | tee -a "))
                .map(|(cmd, log)| (cmd.to_string(), log.trim_matches('\'').to_string()))
                .ok_or_else(|| {
                    ContainerError::command_failed(format!("sh {}", path), "no exec line")
                })?;

            match c.launch.clone() {
                Launch::Spawn(lines) => {
                    let pid = c.next_pid();
                    c.procs.push(FakeProc {
                        pid,
                        ppid: 1,
                        command,
                        zombie: false,
                    });
                    c.append_lines(&log, &lines);
                }
                Launch::Crash(lines) => c.append_lines(&log, &lines),
            }
            Ok(())
        })
    }

    async fn events(&self) -> Result<EventStream> {
        let events = std::mem::take(&mut self.state.lock().events);
        Ok(stream::iter(events.into_iter().map(Ok))
            .chain(stream::pending())
            .boxed())
    }
}

/// 一時ディレクトリ内で完結する設定（待ち時間は最小）
pub fn fake_config() -> (Arc<PanelConfig>, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let config = PanelConfig {
        servers_dir: dir.path().join("servers"),
        state_file: dir.path().join("state.json"),
        start_settle_secs: 0,
        poll_interval_ms: 10,
        exec_timeout_secs: 1,
        leader_lock: LeaderLockConfig {
            path: dir.path().join("event-listener.lock"),
            ttl_secs: 3,
        },
        ..PanelConfig::default()
    };
    (Arc::new(config), dir)
}

/// FakeEngine とストアを組み込んだコントローラ
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub controller: Controller,
    pub dir: TempDir,
}

impl Harness {
    pub async fn register(&self, name: &str, process_type: ProcessType, command: &str) -> Process {
        let process = Process::new(
            name,
            process_type,
            command,
            self.controller.config().process_dir(name),
            1,
        );
        self.controller
            .store()
            .insert_process(process)
            .await
            .expect("failed to register process")
    }
}

pub async fn harness() -> Harness {
    let engine = Arc::new(FakeEngine::new());
    let (config, dir) = fake_config();
    let store = Arc::new(
        ProcessStore::open(&config.state_file)
            .await
            .expect("failed to open store"),
    );
    let live = LiveLogHub::new(config.live_log_capacity);
    let controller = Controller::new(engine.clone(), config, store, live);
    Harness {
        engine,
        controller,
        dir,
    }
}
