//! コマンドとサーバーで共有する実行コンテキスト

use crate::docker;
use anyhow::Context;
use berth_config::PanelConfig;
use berth_container::{
    ContainerEngine, Controller, EventListener, LeaderLock, LiveLogHub, run_with_election,
};
use berth_core::{Process, ProcessStore, Viewer};
use berth_notify::{DiscordNotifier, Notifier};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct App {
    pub controller: Controller,
    pub engine: Arc<dyn ContainerEngine>,
}

impl App {
    /// Docker に接続し、レジストリを開く
    pub async fn connect(config: PanelConfig) -> anyhow::Result<Self> {
        let engine: Arc<dyn ContainerEngine> =
            Arc::new(docker::connect_with_error_handling(&config).await?);
        Self::with_engine(engine, config).await
    }

    pub async fn with_engine(
        engine: Arc<dyn ContainerEngine>,
        config: PanelConfig,
    ) -> anyhow::Result<Self> {
        let store = ProcessStore::open(&config.state_file)
            .await
            .with_context(|| format!("状態ファイル {} を開けません", config.state_file.display()))?;
        let live = LiveLogHub::new(config.live_log_capacity);
        let controller = Controller::new(engine.clone(), Arc::new(config), Arc::new(store), live);
        Ok(Self { controller, engine })
    }

    pub fn config(&self) -> &PanelConfig {
        self.controller.config()
    }

    /// CLI からの操作は管理者として扱う
    pub fn operator() -> Viewer {
        Viewer::new(0).admin()
    }

    pub async fn require(&self, name: &str) -> anyhow::Result<Process> {
        Ok(self.controller.store().require(name).await?)
    }

    /// リーダーになっている間だけイベントリスナーを動かす
    pub async fn run_event_listener(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let config = self.config();
        let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new()?);
        let lock = LeaderLock::new(config.leader_lock.path.clone(), config.leader_ttl());
        let window = config.dedup_window();
        let capacity = config.dedup_capacity;
        let store = self.controller.store().clone();
        let engine = self.engine.clone();

        run_with_election(lock, shutdown, move |stop| {
            let listener = EventListener::new(store.clone(), notifier.clone(), window, capacity);
            listener.run(engine.clone(), stop)
        })
        .await;
        Ok(())
    }
}

/// SIGINT / SIGTERM を待つ
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
