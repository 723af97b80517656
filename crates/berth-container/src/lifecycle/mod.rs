//! Process Lifecycle Controller
//!
//! 起動・停止・再起動。同じプロセス名に対する操作は名前ごとの非同期ロックで直列化する。
//! エンジンのエラーは各段階で結果に変換し、呼び出し側へは構造化された結果だけを返す。

mod reaper;

use crate::cache::StatusCache;
use crate::classifier::{ExecutionModel, classify};
use crate::engine::ContainerEngine;
use crate::inspector::Inspector;
use crate::logs::LiveLogHub;
use crate::resolver::{StatusReport, StatusResolver};
use crate::script;
use berth_config::PanelConfig;
use berth_core::{Process, ProcessStatus, ProcessStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

const CRASH_TAIL_LINES: usize = 10;

/// プロセス名ごとのロック
#[derive(Clone, Default)]
pub struct NameLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl NameLocks {
    fn entry(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.entry(name).lock_owned().await
    }

    /// 2つの名前を常に同じ順序でロックする
    pub async fn lock_pair(&self, a: &str, b: &str) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let g1 = self.lock(first).await;
        let g2 = self.lock(second).await;
        (g1, g2)
    }

    pub fn forget(&self, name: &str) {
        self.locks.lock().remove(name);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_tail: Vec<String>,
}

impl StartOutcome {
    fn started(report: &StatusReport) -> Self {
        Self {
            success: true,
            message: "Process started successfully".to_string(),
            error: None,
            status: report.status,
            pid: report.pid,
            log_tail: Vec::new(),
        }
    }

    fn failed(error: impl Into<String>, status: ProcessStatus) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            error: Some(error),
            status,
            pid: None,
            log_tail: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stopped: usize,
    pub port_listeners: usize,
    pub zombies_cleaned: usize,
}

impl StopOutcome {
    fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: error.clone(),
            error: Some(error),
            ..Default::default()
        }
    }
}

/// 一覧表示用のプロセスと状態
#[derive(Debug, Clone, Serialize)]
pub struct ProcessListing {
    #[serde(flatten)]
    pub process: Process,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_error: Option<String>,
}

#[derive(Clone)]
pub struct Controller {
    pub(crate) inspector: Inspector,
    pub(crate) resolver: StatusResolver,
    pub(crate) store: Arc<ProcessStore>,
    pub(crate) live: LiveLogHub,
    pub(crate) locks: NameLocks,
    pub(crate) cache: Arc<StatusCache<Vec<ProcessListing>>>,
}

impl Controller {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        config: Arc<PanelConfig>,
        store: Arc<ProcessStore>,
        live: LiveLogHub,
    ) -> Self {
        let cache = Arc::new(StatusCache::new(config.status_cache_ttl(), 256));
        let inspector = Inspector::new(engine, config);
        Self {
            resolver: StatusResolver::new(inspector.clone()),
            inspector,
            store,
            live,
            locks: NameLocks::default(),
            cache,
        }
    }

    pub fn config(&self) -> &PanelConfig {
        self.inspector.config()
    }

    pub fn inspector(&self) -> &Inspector {
        &self.inspector
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<ProcessStore> {
        &self.store
    }

    pub fn live(&self) -> &LiveLogHub {
        &self.live
    }

    pub(crate) fn engine(&self) -> &Arc<dyn ContainerEngine> {
        self.inspector.engine()
    }

    pub async fn status(&self, process: &Process) -> StatusReport {
        self.resolver.resolve(process).await
    }

    pub async fn start(&self, process: &Process) -> StartOutcome {
        let _guard = self.locks.lock(&process.name).await;
        let outcome = self.start_locked(process).await;
        self.cache.invalidate_all();
        outcome
    }

    pub async fn stop(&self, process: &Process) -> StopOutcome {
        let _guard = self.locks.lock(&process.name).await;
        let outcome = self.stop_locked(process).await;
        self.cache.invalidate_all();
        outcome
    }

    /// 従来モデルは stop → up、常駐モデルは start（内部で停止済み）
    pub async fn restart(&self, process: &Process) -> StartOutcome {
        let _guard = self.locks.lock(&process.name).await;
        let is_traditional = matches!(
            classify(&self.inspector, &process.name).await,
            Ok(Some(c)) if !c.model.is_always_running()
        );
        if is_traditional {
            let stopped = self.stop_locked(process).await;
            if !stopped.success {
                self.cache.invalidate_all();
                return StartOutcome::failed(stopped.message, ProcessStatus::Error);
            }
        }
        let outcome = self.start_locked(process).await;
        self.cache.invalidate_all();
        outcome
    }

    async fn record_pid(&self, name: &str, pid: Option<u32>) {
        if let Err(e) = self.store.record_pid(name, pid).await {
            tracing::warn!("Failed to record pid for {}: {}", name, e);
        }
    }

    pub(crate) async fn start_locked(&self, process: &Process) -> StartOutcome {
        let name = process.name.as_str();
        let project = self.inspector.project(name);

        let existing = match self.inspector.lookup_container_id(name).await {
            Ok(id) => id,
            Err(e) => return StartOutcome::failed(e.to_string(), ProcessStatus::Error),
        };
        let was_running = match &existing {
            Some(id) => match self.inspector.get_container_state(id).await {
                Ok(state) => state.is_running(),
                Err(e) => return StartOutcome::failed(e.to_string(), ProcessStatus::Error),
            },
            None => false,
        };

        if !was_running {
            tracing::info!("Bringing up container for {}", name);
            if let Err(e) = self.engine().compose_up(&project).await {
                return StartOutcome::failed(e.to_string(), ProcessStatus::Error);
            }
            tokio::time::sleep(self.config().start_settle()).await;
        }

        let classified = match classify(&self.inspector, name).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                return StartOutcome::failed(
                    "compose up did not create a container",
                    ProcessStatus::Exited,
                );
            }
            Err(e) => return StartOutcome::failed(e.to_string(), ProcessStatus::Error),
        };

        if let Err(e) = self
            .store
            .record_container(name, &classified.container_id)
            .await
        {
            tracing::warn!("Failed to record container id for {}: {}", name, e);
        }

        match &classified.model {
            ExecutionModel::Traditional => self.finish_traditional_start(process).await,
            ExecutionModel::AlwaysRunning { main_command } => {
                self.start_supervised(process, &classified.container_id, main_command)
                    .await
            }
        }
    }

    async fn finish_traditional_start(&self, process: &Process) -> StartOutcome {
        let name = process.name.as_str();
        let report = self.resolver.resolve(process).await;

        if report.is_running() {
            let pid = match self.inspector.get_container_id(name).await {
                Some(id) => self
                    .engine()
                    .inspect(&id)
                    .await
                    .ok()
                    .and_then(|info| info.pid),
                None => None,
            };
            self.record_pid(name, pid).await;
            self.live.push_stamped(name, "Container started");
            tracing::info!("Started {}", name);
            return StartOutcome {
                pid,
                ..StartOutcome::started(&report)
            };
        }

        let log_tail = self
            .engine()
            .compose_logs(&self.inspector.project(name), CRASH_TAIL_LINES)
            .await
            .unwrap_or_default();
        let error = report
            .error
            .unwrap_or_else(|| "Container exited immediately. Check logs for details.".to_string());
        StartOutcome {
            log_tail,
            ..StartOutcome::failed(error, report.status)
        }
    }

    /// 常駐コンテナ内でラッパースクリプト経由でコマンドを起動する
    async fn start_supervised(
        &self,
        process: &Process,
        container_id: &str,
        main_command: &str,
    ) -> StartOutcome {
        let name = process.name.as_str();
        let config = self.config();
        let log_file = config.log_file_for(name);

        let stopped = self.reap(process, container_id, main_command).await;
        if !stopped.success {
            tracing::warn!("Pre-start cleanup for {} failed: {}", name, stopped.message);
        }

        match self
            .inspector
            .exec(container_id, script::truncate(&log_file))
            .await
        {
            Ok(out) if out.success() => {}
            Ok(out) => {
                return StartOutcome::failed(
                    format!("Failed to reset log file: {}", out.diagnostic()),
                    ProcessStatus::Error,
                );
            }
            Err(e) => return StartOutcome::failed(e.to_string(), ProcessStatus::Error),
        }
        self.live.push_stamped(name, "===== PROCESS RESTART =====");

        let script_path = script::wrapper_path(name);
        let body = script::wrapper_script(&config.app_dir, &log_file, main_command);
        let installed = self
            .inspector
            .exec(container_id, script::install_script(&script_path, &body))
            .await;
        if let Err(message) = match installed {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(out.diagnostic()),
            Err(e) => Err(e.to_string()),
        } {
            return StartOutcome::failed(
                format!("Failed to create start script: {}", message),
                ProcessStatus::Error,
            );
        }

        match self
            .inspector
            .exec(container_id, script::file_exists(&script_path))
            .await
        {
            Ok(out) if out.success() => {}
            Ok(_) => {
                return StartOutcome::failed(
                    format!("Start script {} was not created", script_path),
                    ProcessStatus::Error,
                );
            }
            Err(e) => return StartOutcome::failed(e.to_string(), ProcessStatus::Error),
        }

        tracing::info!("Launching '{}' in {}", main_command, name);
        if let Err(e) = self
            .engine()
            .exec_detached(container_id, vec!["sh".to_string(), script_path])
            .await
        {
            return StartOutcome::failed(e.to_string(), ProcessStatus::Error);
        }
        self.live.push_stamped(name, "Process start initiated");

        tokio::time::sleep(config.start_settle()).await;
        let report = self.resolver.resolve(process).await;

        if report.is_running() {
            self.live.push_stamped(name, "Process started successfully");
            self.record_pid(name, report.pid).await;
            return StartOutcome::started(&report);
        }

        tracing::warn!("{} crashed right after start ({})", name, report.status);
        self.live
            .push_stamped(name, "Process failed to start or crashed");
        let log_tail: Vec<String> = match self
            .inspector
            .exec(container_id, script::tail_lines(&log_file, CRASH_TAIL_LINES))
            .await
        {
            Ok(out) => out.stdout.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        };
        for line in &log_tail {
            self.live.push(name, line.clone());
        }
        self.record_pid(name, None).await;

        let mut error =
            "Process started but crashed immediately. Check logs for details.".to_string();
        if let Some(detail) = &report.error {
            error.push_str(&format!(" ({})", detail));
        }
        StartOutcome {
            log_tail,
            ..StartOutcome::failed(error, report.status)
        }
    }

    pub(crate) async fn stop_locked(&self, process: &Process) -> StopOutcome {
        let name = process.name.as_str();

        let classified = match classify(&self.inspector, name).await {
            Ok(Some(c)) => c,
            Ok(None) => return StopOutcome::done("Container is not running"),
            Err(e) => return StopOutcome::failed(e.to_string()),
        };

        if !classified.state.is_running() {
            self.record_pid(name, None).await;
            return StopOutcome::done("Container is not running");
        }

        let outcome = match &classified.model {
            ExecutionModel::Traditional => {
                match self
                    .engine()
                    .compose_stop(&self.inspector.project(name))
                    .await
                {
                    Ok(()) => {
                        tracing::info!("Stopped container for {}", name);
                        self.live.push_stamped(name, "Container stopped");
                        StopOutcome {
                            stopped: 1,
                            ..StopOutcome::done("Process stopped")
                        }
                    }
                    Err(e) => StopOutcome::failed(e.to_string()),
                }
            }
            ExecutionModel::AlwaysRunning { main_command } => {
                self.reap(process, &classified.container_id, main_command)
                    .await
            }
        };

        if outcome.success {
            self.record_pid(name, None).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests;
