use crate::app::App;
use colored::Colorize;
use tokio::sync::watch;

/// リーダー選出付きでイベントリスナーを前面で動かす
pub async fn handle(app: App) -> anyhow::Result<()> {
    println!("{}", "Docker イベントを監視中... (Ctrl+C で終了)".blue());
    println!(
        "ロックファイル: {}",
        app.config().leader_lock.path.display().to_string().cyan()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        crate::app::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    app.run_event_listener(shutdown_rx).await?;
    println!("{}", "✓ イベント監視を終了しました".green().bold());
    Ok(())
}
