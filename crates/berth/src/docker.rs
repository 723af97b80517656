use berth_config::PanelConfig;
use berth_container::DockerEngine;
use colored::Colorize;

/// Docker に接続する。失敗したら原因と対処法を表示する
pub async fn connect_with_error_handling(config: &PanelConfig) -> anyhow::Result<DockerEngine> {
    match DockerEngine::connect(config.compose_command.clone()).await {
        Ok(engine) => Ok(engine),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e.to_string().lines().next().unwrap_or_default());
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • DOCKER_HOST の設定を確認してください");
            eprintln!(
                "  • {} コマンドが正常に動作するか確認してください",
                config.compose_command.join(" ")
            );
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}
