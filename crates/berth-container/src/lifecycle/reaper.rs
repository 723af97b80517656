//! 常駐モデルの停止処理
//!
//! 一致したプロセスは子孫ごと TERM し、ゾンビは親に SIGCHLD を送って回収させる。
//! 割り当てポートで待ち受けているプロセスも、コマンド名が変わっていても停止対象にする。

use super::{Controller, StopOutcome};
use crate::port;
use crate::ps::{
    SearchTerms, descendants, parse_listeners, parse_pid_lines, parse_ppid_table, parse_ps_aux,
};
use crate::script;
use berth_core::Process;
use std::collections::{BTreeSet, HashMap};

/// コンテナの init（PID 1）は決して signal しない
const CONTAINER_INIT: u32 = 1;

pub(crate) fn summary(stopped: usize, port_listeners: usize, zombies: usize) -> String {
    if stopped == 0 && zombies == 0 {
        return "No matching processes found to stop".to_string();
    }
    let mut message = format!("Stopped {} process(es)", stopped);
    if port_listeners > 0 {
        message.push_str(&format!(
            " (including {} port-listening process(es))",
            port_listeners
        ));
    }
    if zombies > 0 {
        message.push_str(&format!(" and cleaned {} zombie process(es)", zombies));
    }
    message
}

impl Controller {
    pub(crate) async fn reap(
        &self,
        process: &Process,
        container_id: &str,
        main_command: &str,
    ) -> StopOutcome {
        let name = process.name.as_str();
        let port = process.port(self.config().base_port);

        let table = match self.inspector.exec(container_id, script::ps_aux()).await {
            Ok(out) if out.success() => parse_ps_aux(&out.stdout),
            Ok(out) => {
                return StopOutcome::failed(format!(
                    "Failed to list processes: {}",
                    out.diagnostic()
                ));
            }
            Err(e) => return StopOutcome::failed(e.to_string()),
        };

        let terms = SearchTerms::for_stop(main_command);
        let (zombies, live): (Vec<_>, Vec<_>) = table
            .iter()
            .filter(|row| terms.matches(row))
            .partition(|row| row.is_zombie());

        let ppids = self.ppid_table(container_id).await;

        let mut roots: BTreeSet<u32> = live.iter().map(|row| row.pid).collect();
        let mut port_extra = 0;
        for pid in self.container_listeners(container_id, port).await {
            if pid != CONTAINER_INIT && roots.insert(pid) {
                port_extra += 1;
            }
        }
        roots.remove(&CONTAINER_INIT);

        let mut targets: BTreeSet<u32> = BTreeSet::new();
        for &root in &roots {
            targets.insert(root);
            targets.extend(descendants(root, &ppids));
        }
        targets.remove(&CONTAINER_INIT);

        if !targets.is_empty() {
            let pids: Vec<u32> = targets.iter().copied().collect();
            tracing::info!("Sending SIGTERM to {:?} in {}", pids, name);
            match self
                .inspector
                .exec(container_id, script::kill("TERM", &pids))
                .await
            {
                Ok(out) if !out.success() => {
                    // 既に終了したプロセスがあると kill は非0で終わる
                    tracing::debug!("kill -TERM in {}: {}", name, out.diagnostic());
                }
                Ok(_) => {}
                Err(e) => return StopOutcome::failed(e.to_string()),
            }
        }

        let zombie_parents: BTreeSet<u32> = zombies
            .iter()
            .filter_map(|row| ppids.get(&row.pid).copied())
            .filter(|ppid| *ppid != 0)
            .collect();
        for parent in zombie_parents {
            tracing::debug!("Sending SIGCHLD to {} in {}", parent, name);
            if let Err(e) = self
                .inspector
                .exec(container_id, script::kill("CHLD", &[parent]))
                .await
            {
                tracing::warn!("Failed to reap zombies under {} in {}: {}", parent, name, e);
            }
        }

        let mut host_stopped = 0;
        if self.config().reap_host_listeners {
            for pid in port::host_listeners(port).await {
                tracing::warn!(
                    "Port {} is held on the host by process {}. Attempting cleanup...",
                    port,
                    pid
                );
                port::kill_process_gracefully(pid).await;
                host_stopped += 1;
            }
        }

        let stopped = roots.len() + host_stopped;
        let port_listeners = port_extra + host_stopped;
        let zombies_cleaned = zombies.len();
        let message = summary(stopped, port_listeners, zombies_cleaned);
        tracing::info!("{}: {}", name, message);
        if stopped > 0 || zombies_cleaned > 0 {
            self.live.push_stamped(name, &message);
        }

        StopOutcome {
            success: true,
            message,
            error: None,
            stopped,
            port_listeners,
            zombies_cleaned,
        }
    }

    async fn ppid_table(&self, container_id: &str) -> HashMap<u32, u32> {
        match self.inspector.exec(container_id, script::ppid_table()).await {
            Ok(out) if out.success() => parse_ppid_table(&out.stdout),
            Ok(out) => {
                tracing::debug!("ppid table unavailable: {}", out.diagnostic());
                HashMap::new()
            }
            Err(e) => {
                tracing::debug!("ppid table unavailable: {}", e);
                HashMap::new()
            }
        }
    }

    /// コンテナ内で `port` を待ち受けている PID（netstat、無ければ lsof）
    async fn container_listeners(&self, container_id: &str, port: u16) -> Vec<u32> {
        if let Ok(out) = self
            .inspector
            .exec(container_id, script::listening_sockets())
            .await
        {
            let pids = parse_listeners(&out.stdout, port);
            if !pids.is_empty() {
                return pids;
            }
        }
        match self
            .inspector
            .exec(container_id, script::lsof_port(port))
            .await
        {
            Ok(out) => parse_pid_lines(&out.stdout),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        assert_eq!(summary(0, 0, 0), "No matching processes found to stop");
        assert_eq!(summary(2, 0, 0), "Stopped 2 process(es)");
        assert_eq!(
            summary(3, 1, 2),
            "Stopped 3 process(es) (including 1 port-listening process(es)) and cleaned 2 zombie process(es)"
        );
        assert_eq!(
            summary(0, 0, 1),
            "Stopped 0 process(es) and cleaned 1 zombie process(es)"
        );
    }
}
