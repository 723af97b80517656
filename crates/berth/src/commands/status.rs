use crate::app::App;
use crate::commands::colored_status;
use colored::Colorize;

pub async fn handle(app: &App, name: &str, json: bool) -> anyhow::Result<()> {
    let process = app.require(name).await?;
    let report = app.controller.status(&process).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("プロセス: {}", process.name.cyan());
    println!("種別:     {}", process.process_type);
    println!("状態:     {}", colored_status(report.status));
    println!(
        "コンテナ: {}",
        if report.container_running {
            "起動中".green()
        } else {
            "停止".dimmed()
        }
    );
    if let Some(pid) = report.pid {
        println!("PID:      {}", pid);
    }
    if let Some(error) = report.error {
        println!();
        println!("{}", format!("✗ {}", error).red());
    }

    Ok(())
}
