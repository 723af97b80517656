//! イベントリスナーのリーダー選出
//!
//! 同じ状態ディレクトリを共有する複数のインスタンスのうち、ロックファイルを
//! 作成できた1つだけがイベントを処理する。保持者は TTL 内に更新し続け、
//! 終了時に削除する。期限切れ、または保持者のプロセスが消えたロックは奪ってよい。

use crate::error::Result;
use crate::port;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    holder: String,
    expires_at: DateTime<Utc>,
}

pub struct LeaderLock {
    path: PathBuf,
    ttl: Duration,
    pid: u32,
    holder: String,
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".to_string())
}

impl LeaderLock {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            pid: std::process::id(),
            holder: hostname(),
        }
    }

    /// 識別子を差し替える（同一プロセス内で複数の候補を試すとき）
    pub fn with_identity(mut self, pid: u32, holder: impl Into<String>) -> Self {
        self.pid = pid;
        self.holder = holder.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn record(&self) -> LockRecord {
        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        LockRecord {
            pid: self.pid,
            holder: self.holder.clone(),
            expires_at: Utc::now() + ttl,
        }
    }

    fn is_mine(&self, record: &LockRecord) -> bool {
        record.pid == self.pid && record.holder == self.holder
    }

    /// 読めない・期限切れ・同一ホストで保持者が消えている、のいずれか
    fn is_abandoned(&self, record: Option<&LockRecord>) -> bool {
        let Some(record) = record else {
            return true;
        };
        if record.expires_at <= Utc::now() {
            return true;
        }
        record.holder == self.holder
            && i32::try_from(record.pid).is_ok_and(|pid| !port::is_process_alive(pid))
    }

    async fn read(&self) -> Result<Option<LockRecord>> {
        Ok(read_raw(&self.path)
            .await?
            .and_then(|content| serde_json::from_str(&content).ok()))
    }

    fn tombstone(&self) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut path = self.path.as_os_str().to_owned();
        path.push(format!(".stale.{}.{}", self.pid, nanos));
        PathBuf::from(path)
    }

    /// 期限切れと判断した内容 `seen` のロックを退避する。
    ///
    /// 退避した中身が `seen` と違えば、判断の後で別の候補が作り直したロックなので
    /// 元に戻して false を返す。
    async fn evict(&self, seen: Option<&str>) -> Result<bool> {
        let tombstone = self.tombstone();
        match fs::rename(&self.path, &tombstone).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let moved = read_raw(&tombstone).await?;
        let stale = moved.as_deref() == seen;
        if !stale {
            tracing::debug!("Leader lock was re-created concurrently, restoring it");
            // hard_link は既存のパスを上書きしない
            match fs::hard_link(&tombstone, &self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
        fs::remove_file(&tombstone).await?;
        Ok(stale)
    }

    async fn create(&self) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        let content = serde_json::to_vec(&self.record())?;
        file.write_all(&content).await?;
        file.flush().await
    }

    async fn overwrite(&self) -> Result<()> {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serde_json::to_vec(&self.record())?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// ロックを取得できたら true
    pub async fn try_acquire(&self) -> Result<bool> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        for _ in 0..2 {
            match self.create().await {
                Ok(()) => {
                    tracing::debug!("Acquired leader lock {}", self.path.display());
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let seen = read_raw(&self.path).await?;
            let record: Option<LockRecord> = seen
                .as_deref()
                .and_then(|content| serde_json::from_str(content).ok());
            if record.as_ref().is_some_and(|r| self.is_mine(r)) {
                self.overwrite().await?;
                return Ok(true);
            }
            if !self.is_abandoned(record.as_ref()) {
                return Ok(false);
            }
            if let Some(r) = &record {
                tracing::warn!("Removing stale leader lock held by {} (pid {})", r.holder, r.pid);
            }
            if !self.evict(seen.as_deref()).await? {
                return Ok(false);
            }
        }
        Ok(false)
    }

    /// 期限を延長する。既に他の候補に奪われていたら false
    pub async fn refresh(&self) -> Result<bool> {
        match self.read().await? {
            Some(record) if self.is_mine(&record) => {
                self.overwrite().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// 自分が保持している場合だけ削除する
    pub async fn release(&self) -> Result<()> {
        if let Some(record) = self.read().await? {
            if self.is_mine(&record) {
                fs::remove_file(&self.path).await?;
                tracing::debug!("Released leader lock {}", self.path.display());
            }
        }
        Ok(())
    }
}

async fn read_raw(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// リーダーの間だけ `make_task` のタスクを動かす
///
/// タスクには停止通知用の受信側が渡される。`shutdown` が立つとタスクを止め、
/// ロックを解放して戻る。
pub async fn run_with_election<F, Fut>(
    lock: LeaderLock,
    mut shutdown: watch::Receiver<bool>,
    mut make_task: F,
) where
    F: FnMut(watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let ttl = lock.ttl().max(Duration::from_millis(30));

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        match lock.try_acquire().await {
            Ok(true) => {
                tracing::info!("Acquired leadership, starting event listener");
                let (stop_tx, stop_rx) = watch::channel(false);
                let mut task = tokio::spawn(make_task(stop_rx));
                let mut refresh = tokio::time::interval(ttl / 3);
                refresh.tick().await;

                let mut finished = false;
                let shutting_down = loop {
                    tokio::select! {
                        _ = shutdown.changed() => break true,
                        _ = &mut task => {
                            tracing::warn!("Leader task exited unexpectedly");
                            finished = true;
                            break false;
                        }
                        _ = refresh.tick() => match lock.refresh().await {
                            Ok(true) => {}
                            Ok(false) => {
                                tracing::warn!("Leadership lost");
                                break false;
                            }
                            Err(e) => tracing::warn!("Failed to refresh leader lock: {}", e),
                        },
                    }
                };

                let _ = stop_tx.send(true);
                if !finished {
                    let _ = task.await;
                }
                if let Err(e) = lock.release().await {
                    tracing::warn!("Failed to release leader lock: {}", e);
                }
                if shutting_down {
                    break;
                }
            }
            Ok(false) => tracing::debug!("Another instance holds the leader lock"),
            Err(e) => tracing::warn!("Leader election failed: {}", e),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(ttl / 2) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// 存在しないPID
    const DEAD_PID: u32 = i32::MAX as u32;

    fn lock(dir: &Path, pid: u32, ttl: Duration) -> LeaderLock {
        LeaderLock::new(dir.join("leader.lock"), ttl).with_identity(pid, "host-a")
    }

    #[tokio::test]
    async fn test_only_one_holder() {
        let dir = tempdir().unwrap();
        let a = lock(dir.path(), std::process::id(), Duration::from_secs(60));
        let b = lock(dir.path(), DEAD_PID - 1, Duration::from_secs(60));

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        // 再取得は更新として成功する
        assert!(a.try_acquire().await.unwrap());
        assert!(a.refresh().await.unwrap());
        assert!(!b.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_hands_over() {
        let dir = tempdir().unwrap();
        let a = lock(dir.path(), std::process::id(), Duration::from_secs(60));
        let b = lock(dir.path(), DEAD_PID - 1, Duration::from_secs(60));

        assert!(a.try_acquire().await.unwrap());
        b.release().await.unwrap();
        assert!(a.path().exists());

        a.release().await.unwrap();
        assert!(!a.path().exists());
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_fails_over() {
        let dir = tempdir().unwrap();
        let a = lock(dir.path(), std::process::id(), Duration::ZERO);
        let b = lock(dir.path(), DEAD_PID - 1, Duration::from_secs(60));

        assert!(a.try_acquire().await.unwrap());
        assert!(b.try_acquire().await.unwrap());
        assert!(!a.refresh().await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_holder_on_same_host_fails_over() {
        let dir = tempdir().unwrap();
        let dead = lock(dir.path(), DEAD_PID, Duration::from_secs(60));
        let live = lock(dir.path(), std::process::id(), Duration::from_secs(60));

        assert!(dead.try_acquire().await.unwrap());
        assert!(live.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_takeover_keeps_concurrently_created_lock() {
        let dir = tempdir().unwrap();
        let stale = lock(dir.path(), DEAD_PID, Duration::ZERO);
        assert!(stale.try_acquire().await.unwrap());
        let seen = std::fs::read_to_string(stale.path()).unwrap();

        // 別の候補が先に期限切れロックを奪い、作り直した後
        let winner = lock(dir.path(), std::process::id(), Duration::from_secs(60));
        assert!(winner.try_acquire().await.unwrap());

        let late = lock(dir.path(), DEAD_PID - 1, Duration::from_secs(60));
        assert!(!late.evict(Some(&seen)).await.unwrap());
        assert!(winner.refresh().await.unwrap());
        assert!(!late.try_acquire().await.unwrap());

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_corrupt_lock_is_replaced() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("leader.lock"), "not json").unwrap();
        let a = lock(dir.path(), std::process::id(), Duration::from_secs(60));
        assert!(a.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_election_runs_task_and_releases_on_shutdown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("leader.lock");
        let candidate = LeaderLock::new(&path, Duration::from_secs(3));
        let (shutdown_tx, shutdown) = watch::channel(false);
        let (started_tx, mut started) = tokio::sync::mpsc::unbounded_channel();

        let election = tokio::spawn(run_with_election(candidate, shutdown, move |mut stop| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(());
                let _ = stop.changed().await;
            }
        }));

        tokio::time::timeout(Duration::from_secs(2), started.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(path.exists());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), election)
            .await
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }
}
