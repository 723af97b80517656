//! ホスト側のポート占有プロセスの回収
//!
//! docker-proxy はコンテナへの転送役なので対象外。

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info, warn};

const GRACE_PERIOD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const IGNORED_PROGRAMS: [&str; 1] = ["docker-proxy"];

/// `lsof -ti:{port}` で PID を取得する。lsof が無い・失敗した場合は空
pub async fn find_pids_by_port(port: u16) -> Vec<i32> {
    let output = Command::new("lsof")
        .arg("-t")
        .arg(format!("-i:{}", port))
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<i32>().ok())
            .collect(),
        _ => Vec::new(),
    }
}

async fn program_name(pid: i32) -> Option<String> {
    tokio::fs::read_to_string(format!("/proc/{}/comm", pid))
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

/// 回収してよいホスト側のポート占有プロセス
pub async fn host_listeners(port: u16) -> Vec<i32> {
    let own = std::process::id() as i32;
    let mut pids = Vec::new();
    for pid in find_pids_by_port(port).await {
        if pid == own {
            continue;
        }
        match program_name(pid).await {
            Some(name) if IGNORED_PROGRAMS.contains(&name.as_str()) => {
                debug!("Skipping {} (pid {}) on port {}", name, pid, port);
            }
            _ => pids.push(pid),
        }
    }
    pids
}

/// SIGTERM を送り、猶予内に終了しなければ SIGKILL
pub async fn kill_process_gracefully(pid: i32) {
    let nix_pid = Pid::from_raw(pid);

    info!("Sending SIGTERM to process {}", pid);
    if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
        debug!("Failed to send SIGTERM to {}: {}", pid, e);
        return;
    }

    let start = Instant::now();
    while start.elapsed() < GRACE_PERIOD {
        if !is_process_alive(pid) {
            info!("Process {} exited gracefully", pid);
            return;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    warn!("Timeout reached. Sending SIGKILL to process {}", pid);
    let _ = signal::kill(nix_pid, Signal::SIGKILL);
}

pub fn is_process_alive(pid: i32) -> bool {
    signal::kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        assert!(is_process_alive(std::process::id() as i32));
    }

    #[tokio::test]
    async fn test_kill_process_gracefully() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap() as i32;

        kill_process_gracefully(pid).await;
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_unused_port_has_no_listeners() {
        assert!(host_listeners(1).await.is_empty());
    }
}
