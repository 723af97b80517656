//! 通知の送信
//!
//! ライフサイクルイベントを整形して Webhook へ POST する。送信は投げっぱなしで、
//! 失敗は呼び出し側がログに残すだけで再送しない。

pub mod discord;
pub mod error;

pub use discord::{DiscordNotifier, event_message};
pub use error::{NotifyError, Result};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Webhook へ送るメッセージ本文
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub content: String,
}

/// 1回の送信結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// 204 No Content が返った
    Delivered,
    /// それ以外の応答
    Rejected { status: u16, body: String },
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, webhook_url: &str, payload: &WebhookPayload) -> Result<Delivery>;
}

/// バックグラウンドタスクで送信する。呼び出し側は応答を待たない
pub fn dispatch_detached(
    notifier: Arc<dyn Notifier>,
    webhook_url: String,
    payload: WebhookPayload,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match notifier.deliver(&webhook_url, &payload).await {
            Ok(Delivery::Delivered) => {
                tracing::info!("Webhook delivered: {}", payload.content);
            }
            Ok(Delivery::Rejected { status, body }) => {
                tracing::error!("Webhook rejected with status {}: {}", status, body);
            }
            Err(e) => {
                tracing::error!("Webhook delivery failed: {}", e);
            }
        }
    })
}
