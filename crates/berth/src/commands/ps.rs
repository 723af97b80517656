use crate::app::App;
use crate::commands::colored_status;
use colored::Colorize;

pub async fn handle(app: &App) -> anyhow::Result<()> {
    println!("{}", "プロセス一覧を取得中...".blue());

    let listing = app.controller.list_with_status(&App::operator()).await;
    let base_port = app.config().base_port;

    println!();
    if listing.is_empty() {
        println!("{}", "登録されているプロセスはありません".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<20} {:<12} {:<24} {:<8} {:<40}",
            "NAME", "TYPE", "STATUS", "PORT", "COMMAND"
        )
        .bold()
    );
    println!("{}", "─".repeat(105).dimmed());

    for entry in listing {
        let process = &entry.process;
        println!(
            "{:<20} {:<12} {:<24} {:<8} {:<40}",
            process.name.cyan(),
            process.process_type.as_str(),
            colored_status(entry.status),
            process.port(base_port),
            process.command.dimmed()
        );
        if let Some(error) = entry.status_error {
            println!("  {} {}", "└".dimmed(), error.red());
        }
    }

    Ok(())
}
