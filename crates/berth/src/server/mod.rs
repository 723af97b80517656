//! HTTP API
//!
//! 認証は前段の層が行い、利用者の識別子をヘッダーで渡してくる前提。

mod error;
mod handlers;

use crate::app::{App, shutdown_signal};
use anyhow::Context;
use axum::Router;
use axum::routing::{delete, get, post};
use berth_container::LiveLogHub;
use colored::Colorize;
use std::time::Duration;
use tokio::sync::watch;

const LIVE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub app: App,
    /// true になったらログストリームを閉じる
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/processes",
            get(handlers::list_processes).post(handlers::add_process),
        )
        .route("/api/processes/{name}", delete(handlers::delete_process))
        .route("/api/processes/{name}/rename", post(handlers::rename_process))
        .route("/api/processes/{name}/status", get(handlers::status))
        .route("/api/processes/{name}/start", post(handlers::start))
        .route("/api/processes/{name}/stop", post(handlers::stop))
        .route("/api/processes/{name}/restart", post(handlers::restart))
        .route("/api/processes/{name}/exec", post(handlers::exec))
        .route("/api/processes/{name}/logs", get(handlers::logs))
        .route("/api/processes/{name}/logs/clear", post(handlers::clear_logs))
        .with_state(state)
}

/// 購読者のいなくなったライブキューを定期的に破棄する
async fn sweep_live_queues(live: LiveLogHub, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(LIVE_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let swept = live.sweep();
                if swept > 0 {
                    tracing::debug!("Swept {} idle live log queues", swept);
                }
            }
        }
    }
}

/// HTTP サーバーを起動し、SIGINT / SIGTERM で停止する
pub async fn serve(app: App, with_events: bool) -> anyhow::Result<()> {
    let addr = app.config().bind_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut background = Vec::new();
    if with_events {
        let app = app.clone();
        let rx = shutdown_rx.clone();
        background.push(tokio::spawn(async move {
            if let Err(e) = app.run_event_listener(rx).await {
                tracing::error!("Event listener failed: {}", e);
            }
        }));
    }
    background.push(tokio::spawn(sweep_live_queues(
        app.controller.live().clone(),
        shutdown_rx.clone(),
    )));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("{} で待ち受けできません", addr))?;

    println!("{}", format!("✓ berth を起動しました: http://{}", addr).green().bold());
    if !with_events {
        println!("{}", "ℹ イベントリスナーは無効です".dimmed());
    }
    tracing::info!("Listening on {}", addr);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let router = router(AppState {
        app,
        shutdown: shutdown_rx.clone(),
    });
    let mut stopping = shutdown_rx;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = stopping.wait_for(|s| *s).await;
        })
        .await?;

    for task in background {
        let _ = task.await;
    }
    println!("{}", "✓ berth を停止しました".green().bold());
    Ok(())
}
