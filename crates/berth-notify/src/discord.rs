//! Discord Webhook クライアント

use crate::error::{NotifyError, Result};
use crate::{Delivery, Notifier, WebhookPayload};
use async_trait::async_trait;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// コンテナのライフサイクルイベントを通知メッセージにする
pub fn event_message(action: &str, container: &str) -> WebhookPayload {
    WebhookPayload {
        content: format!("Event triggered: {} for container {}", action, container),
    }
}

pub struct DiscordNotifier {
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("berth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn deliver(&self, webhook_url: &str, payload: &WebhookPayload) -> Result<Delivery> {
        if webhook_url.trim().is_empty() {
            return Err(NotifyError::MissingUrl);
        }

        let response = self.client.post(webhook_url).json(payload).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Delivery::Delivered);
        }

        let body = response.text().await.unwrap_or_default();
        Ok(Delivery::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
