mod app;
mod commands;
mod docker;
mod server;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "compose プロジェクトをプロセスとして扱うセルフホストパネル", long_about = None)]
struct Cli {
    /// 詳細なログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// HTTP API とイベントリスナーを起動
    Serve {
        /// 待ち受けアドレス（設定ファイルの bind を上書き）
        #[arg(short, long)]
        bind: Option<String>,
        /// イベントリスナーを起動しない
        #[arg(long)]
        no_events: bool,
    },
    /// 登録済みプロセスの一覧と状態を表示
    Ps,
    /// プロセスの状態を表示
    Status {
        /// プロセス名
        name: String,
        /// JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// プロセスを起動
    Start {
        /// プロセス名
        name: String,
    },
    /// プロセスを停止
    Stop {
        /// プロセス名
        name: String,
    },
    /// プロセスを再起動
    Restart {
        /// プロセス名
        name: String,
    },
    /// プロセスのログを表示
    Logs {
        /// プロセス名
        name: String,
        /// ログをリアルタイムで追跡
        #[arg(short, long)]
        follow: bool,
    },
    /// コンテナ内でコマンドを実行
    Exec {
        /// プロセス名
        name: String,
        /// 実行するコマンド
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// ログファイルを空にする
    ClearLogs {
        /// プロセス名
        name: String,
    },
    /// Docker イベントを監視して Discord に通知
    Events,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if cli.verbose {
        filter = filter.add_directive(tracing::Level::DEBUG.into());
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("berth {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = berth_config::load()?;
    if let Commands::Serve { bind: Some(bind), .. } = &cli.command {
        config.bind = bind.clone();
    }

    let app = app::App::connect(config).await?;

    match cli.command {
        Commands::Serve { no_events, .. } => {
            server::serve(app, !no_events).await?;
        }
        Commands::Ps => {
            commands::ps::handle(&app).await?;
        }
        Commands::Status { name, json } => {
            commands::status::handle(&app, &name, json).await?;
        }
        Commands::Start { name } => {
            commands::lifecycle::start(&app, &name).await?;
        }
        Commands::Stop { name } => {
            commands::lifecycle::stop(&app, &name).await?;
        }
        Commands::Restart { name } => {
            commands::lifecycle::restart(&app, &name).await?;
        }
        Commands::Logs { name, follow } => {
            commands::logs::handle(&app, &name, follow).await?;
        }
        Commands::Exec { name, command } => {
            commands::exec::handle(&app, &name, &command.join(" ")).await?;
        }
        Commands::ClearLogs { name } => {
            commands::exec::clear_logs(&app, &name).await?;
        }
        Commands::Events => {
            commands::events::handle(app).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
