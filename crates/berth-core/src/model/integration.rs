use serde::{Deserialize, Serialize};

/// Discord Webhook 連携設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordIntegration {
    pub process_name: String,
    pub webhook_url: String,

    /// 通知対象のイベントアクション名（`start`, `die` など）
    #[serde(default)]
    pub events: Vec<String>,
}

impl DiscordIntegration {
    pub fn subscribes_to(&self, action: &str) -> bool {
        self.events.iter().any(|e| e == action)
    }
}
