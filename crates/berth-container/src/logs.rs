//! Live Log Streamer
//!
//! 1接続につき1タスク。履歴（compose ログ・コンテナ内ログファイル）を先に送り、
//! その後ライブ行を送る。ライブ行はログファイルの差分とメモリ上のライブキュー
//! （コマンド実行やライフサイクルのメッセージ）の2系統で、系統間の順序は保証しない。

use crate::classifier::{ExecutionModel, classify};
use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::inspector::Inspector;
use crate::script;
use berth_core::Process;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const CLIENT_BUFFER: usize = 256;

/// `[YYYY-mm-dd HH:MM:SS] message`
pub fn stamp(message: &str) -> String {
    format!(
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )
}

/// プロセスごとのライブキュー
///
/// 容量付きの broadcast チャネルで、遅い購読者は古い行を取りこぼす。
/// 購読者がいない間の行は容量分だけ保持し、次に購読した1人へ先に渡す。
/// 購読者も保留行も無いチャネルは [`LiveLogHub::sweep`] で破棄する。
#[derive(Clone)]
pub struct LiveLogHub {
    channels: Arc<Mutex<HashMap<String, LiveChannel>>>,
    capacity: usize,
}

struct LiveChannel {
    tx: broadcast::Sender<String>,
    backlog: VecDeque<String>,
}

impl LiveChannel {
    fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
            backlog: VecDeque::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.tx.receiver_count() == 0 && self.backlog.is_empty()
    }
}

impl LiveLogHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, name: &str) -> LiveSubscription {
        let mut channels = self.channels.lock();
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(|| LiveChannel::new(self.capacity));
        LiveSubscription {
            backlog: std::mem::take(&mut channel.backlog),
            rx: channel.tx.subscribe(),
        }
    }

    /// 購読者がいなければ保留し、容量を超えた古い行から捨てる
    pub fn push(&self, name: &str, line: impl Into<String>) {
        let line = line.into();
        let mut channels = self.channels.lock();
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(|| LiveChannel::new(self.capacity));
        if channel.tx.receiver_count() > 0 {
            let _ = channel.tx.send(line);
            return;
        }
        channel.backlog.push_back(line);
        while channel.backlog.len() > self.capacity {
            channel.backlog.pop_front();
        }
    }

    pub fn push_stamped(&self, name: &str, message: &str) {
        self.push(name, stamp(message));
    }

    pub fn remove(&self, name: &str) {
        self.channels.lock().remove(name);
    }

    /// 使われていないチャネルを破棄し、破棄した数を返す
    pub fn sweep(&self) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|_, channel| !channel.is_idle());
        before - channels.len()
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// ライブキューの購読。保留されていた行を先に返す
pub struct LiveSubscription {
    backlog: VecDeque<String>,
    rx: broadcast::Receiver<String>,
}

impl LiveSubscription {
    pub async fn recv(&mut self) -> std::result::Result<String, broadcast::error::RecvError> {
        if let Some(line) = self.backlog.pop_front() {
            return Ok(line);
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<String, broadcast::error::TryRecvError> {
        if let Some(line) = self.backlog.pop_front() {
            return Ok(line);
        }
        self.rx.try_recv()
    }
}

/// ログファイルの読み取り位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCursor {
    offset: u64,
}

impl LogCursor {
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 現在のファイルサイズから未送信の範囲 `(from, len)` を返し、位置を進める。
    /// ファイルが縮んでいたら（再起動時の切り詰め）先頭から読み直す
    pub fn advance(&mut self, size: u64) -> Option<(u64, u64)> {
        if size < self.offset {
            self.offset = 0;
        }
        if size == self.offset {
            return None;
        }
        let range = (self.offset, size - self.offset);
        self.offset = size;
        Some(range)
    }
}

/// バイト列を行に組み立てる。末尾の改行の無い断片は次回に持ち越す
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        String::from_utf8_lossy(&complete)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[derive(Clone)]
pub struct LogStreamer {
    inspector: Inspector,
    live: LiveLogHub,
}

impl LogStreamer {
    pub fn new(inspector: Inspector, live: LiveLogHub) -> Self {
        Self { inspector, live }
    }

    /// ログ行の受信側を返す。受信側を破棄するとストリームタスクも終了する
    pub fn open(&self, process: &Process) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let task = StreamTask {
            inspector: self.inspector.clone(),
            live: self.live.subscribe(&process.name),
            name: process.name.clone(),
            tx,
        };
        tokio::spawn(task.run());
        rx
    }

    /// 追従せずに履歴だけを返す
    pub async fn history(&self, process: &Process) -> Result<Vec<String>> {
        let config = self.inspector.config();
        let project = self.inspector.project(&process.name);
        let mut lines = self
            .inspector
            .engine()
            .compose_logs(&project, config.history_lines)
            .await?;

        if let Some(c) = classify(&self.inspector, &process.name).await? {
            if c.state.is_running() && matches!(c.model, ExecutionModel::AlwaysRunning { .. }) {
                let log_file = config.log_file_for(&process.name);
                let out = self
                    .inspector
                    .exec(
                        &c.container_id,
                        script::tail_lines(&log_file, config.history_lines),
                    )
                    .await?;
                lines.extend(out.stdout.lines().map(str::to_string));
            }
        }
        Ok(lines)
    }
}

struct StreamTask {
    inspector: Inspector,
    live: LiveSubscription,
    name: String,
    tx: mpsc::Sender<String>,
}

/// 送信先が切断されたら Err
type Sent = std::result::Result<(), ()>;

impl StreamTask {
    async fn run(mut self) {
        let outcome = match classify(&self.inspector, &self.name).await {
            Ok(Some(c)) => match c.model {
                ExecutionModel::AlwaysRunning { .. } => {
                    self.stream_supervised(&c.container_id).await
                }
                ExecutionModel::Traditional => self.stream_compose().await,
            },
            Ok(None) => self.stream_compose().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(_) => tracing::debug!("Log stream for {} closed", self.name),
            Err(e) => {
                tracing::warn!("Log stream for {} failed: {}", self.name, e);
                let _ = self.tx.send(format!("[stream error] {}", e)).await;
            }
        }
    }

    async fn send(&self, line: String) -> Sent {
        self.tx.send(line).await.map_err(|_| ())
    }

    fn engine(&self) -> &Arc<dyn ContainerEngine> {
        self.inspector.engine()
    }

    async fn file_size(&self, container_id: &str, log_file: &str) -> Result<Option<u64>> {
        let out = self
            .inspector
            .exec(container_id, script::file_size(log_file))
            .await?;
        if !out.success() {
            return Ok(None);
        }
        Ok(out.stdout.trim().parse().ok())
    }

    /// 常駐モデル: 履歴の後、ライブキューとログファイルの差分をポーリングする
    async fn stream_supervised(&mut self, container_id: &str) -> Result<Sent> {
        let config = self.inspector.config().clone();
        let project = self.inspector.project(&self.name);
        let log_file = config.log_file_for(&self.name);

        for line in self
            .engine()
            .compose_logs(&project, config.history_lines)
            .await?
        {
            if self.send(line).await.is_err() {
                return Ok(Err(()));
            }
        }

        let mut cursor = LogCursor::default();
        if let Some(size) = self.file_size(container_id, &log_file).await? {
            let out = self
                .inspector
                .exec(
                    container_id,
                    script::tail_within(&log_file, size, config.history_lines),
                )
                .await?;
            for line in out.stdout.lines() {
                if self.send(line.to_string()).await.is_err() {
                    return Ok(Err(()));
                }
            }
            cursor = LogCursor::at(size);
        }

        let mut assembler = LineAssembler::default();
        let poll = config.poll_interval();

        loop {
            // ライブキューに行があればファイルより先に1行送る
            match self.live.try_recv() {
                Ok(line) => {
                    if self.send(line).await.is_err() {
                        return Ok(Err(()));
                    }
                    continue;
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::debug!("Live queue for {} lagged by {} lines", self.name, n);
                    continue;
                }
                Err(_) => {}
            }

            if let Some(size) = self.file_size(container_id, &log_file).await? {
                if size < cursor.offset() {
                    assembler.reset();
                }
                if let Some((from, len)) = cursor.advance(size) {
                    let out = self
                        .inspector
                        .exec(container_id, script::read_range(&log_file, from, len))
                        .await?;
                    for line in assembler.push(out.stdout.as_bytes()) {
                        if self.send(line).await.is_err() {
                            return Ok(Err(()));
                        }
                    }
                }
            }

            tokio::select! {
                _ = self.tx.closed() => return Ok(Err(())),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// 従来モデル: compose logs の出力をそのまま流し、ライブキューを混ぜる
    async fn stream_compose(&mut self) -> Result<Sent> {
        let config = self.inspector.config().clone();
        let project = self.inspector.project(&self.name);

        let mut follow = self
            .engine()
            .follow_compose_logs(&project, config.history_lines)
            .await?;

        let mut live_open = true;
        loop {
            tokio::select! {
                _ = self.tx.closed() => return Ok(Err(())),
                line = follow.next() => match line {
                    Some(Ok(line)) => {
                        if self.send(line).await.is_err() {
                            return Ok(Err(()));
                        }
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(Ok(())),
                },
                msg = self.live.recv(), if live_open => match msg {
                    Ok(line) => {
                        if self.send(line).await.is_err() {
                            return Ok(Err(()));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => live_open = false,
                },
            }
        }
    }
}
