use crate::app::App;
use colored::Colorize;

pub async fn handle(app: &App, name: &str, command: &str) -> anyhow::Result<()> {
    let process = app.require(name).await?;

    println!(
        "{}",
        format!("プロセス '{}' でコマンドを実行中...", name).green()
    );
    println!("コマンド: {}", command.cyan());
    println!();

    let outcome = app.controller.execute(&process, command).await?;
    if !outcome.output.is_empty() {
        print!("{}", outcome.output);
        if !outcome.output.ends_with('\n') {
            println!();
        }
    }

    match outcome.error {
        None => Ok(()),
        Some(error) => {
            println!("{}", "✗ コマンドが失敗しました".red().bold());
            Err(anyhow::anyhow!("{}", error))
        }
    }
}

pub async fn clear_logs(app: &App, name: &str) -> anyhow::Result<()> {
    let process = app.require(name).await?;
    app.controller.clear_logs(&process).await?;
    println!("{}", format!("✓ '{}' のログを消去しました", name).green().bold());
    Ok(())
}
