use crate::app::App;
use crate::commands::colored_status;
use berth_container::StartOutcome;
use colored::Colorize;

fn report_start(name: &str, outcome: StartOutcome, verb: &str) -> anyhow::Result<()> {
    println!();
    if outcome.success {
        println!(
            "{}",
            format!("✓ '{}' を{}しました", name, verb).green().bold()
        );
        println!("状態: {}", colored_status(outcome.status));
        if let Some(pid) = outcome.pid {
            println!("PID:  {}", pid);
        }
        return Ok(());
    }

    println!("{}", format!("✗ '{}' の{}に失敗しました", name, verb).red().bold());
    println!("状態: {}", colored_status(outcome.status));
    if !outcome.log_tail.is_empty() {
        println!();
        println!("{}", "直近のログ:".yellow());
        for line in &outcome.log_tail {
            println!("  {}", line.dimmed());
        }
    }
    Err(anyhow::anyhow!(
        "{}",
        outcome.error.unwrap_or(outcome.message)
    ))
}

pub async fn start(app: &App, name: &str) -> anyhow::Result<()> {
    println!("{}", format!("プロセス '{}' を起動中...", name).green());
    let process = app.require(name).await?;
    let outcome = app.controller.start(&process).await;
    report_start(name, outcome, "起動")
}

pub async fn restart(app: &App, name: &str) -> anyhow::Result<()> {
    println!("{}", format!("プロセス '{}' を再起動中...", name).yellow());
    let process = app.require(name).await?;
    let outcome = app.controller.restart(&process).await;
    report_start(name, outcome, "再起動")
}

pub async fn stop(app: &App, name: &str) -> anyhow::Result<()> {
    println!("{}", format!("プロセス '{}' を停止中...", name).yellow());
    let process = app.require(name).await?;
    let outcome = app.controller.stop(&process).await;

    println!();
    if !outcome.success {
        println!("{}", format!("✗ '{}' の停止に失敗しました", name).red().bold());
        return Err(anyhow::anyhow!(
            "{}",
            outcome.error.unwrap_or(outcome.message)
        ));
    }

    println!("{}", format!("✓ '{}' を停止しました", name).green().bold());
    println!("{}", outcome.message.dimmed());
    if outcome.stopped + outcome.port_listeners + outcome.zombies_cleaned > 0 {
        println!(
            "  停止したプロセス: {} / ポート占有: {} / ゾンビ回収: {}",
            outcome.stopped, outcome.port_listeners, outcome.zombies_cleaned
        );
    }
    Ok(())
}
