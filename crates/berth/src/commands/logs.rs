use crate::app::App;
use berth_container::LogStreamer;
use colored::Colorize;

pub async fn handle(app: &App, name: &str, follow: bool) -> anyhow::Result<()> {
    let process = app.require(name).await?;
    let streamer = LogStreamer::new(
        app.controller.inspector().clone(),
        app.controller.live().clone(),
    );

    if !follow {
        println!("{}", format!("=== {} のログ ===", name).bold().cyan());
        for line in streamer.history(&process).await? {
            println!("{}", line);
        }
        return Ok(());
    }

    println!(
        "{}",
        format!("{} のログを追跡中... (Ctrl+C で終了)", name).blue()
    );
    let mut rx = streamer.open(&process);
    let shutdown = crate::app::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = rx.recv() => match line {
                Some(line) => println!("{}", line),
                None => break,
            },
        }
    }
    Ok(())
}
