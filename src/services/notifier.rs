use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::models::SyncRun;

/// Outbound channel for run summaries
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Telegram Bot API `sendMessage`
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_base: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Built only when both credentials are configured
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>> {
        match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat)) => Ok(Some(Self::new(token.clone(), chat.clone())?)),
            _ => Ok(None),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": message,
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notify(format!("telegram returned HTTP {}: {}", status.as_u16(), body)));
        }
        debug!("Telegram notification delivered");
        Ok(())
    }
}

/// Telegram rejects messages over 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

/// Plain-text run summary, failed units included, cut to fit a single message
pub fn failure_report(title: &str, run: &SyncRun) -> String {
    let report = format!("{}\n{}", title, run.format_summary());
    if report.chars().count() <= MAX_MESSAGE_CHARS {
        return report;
    }
    let mut cut: String = report.chars().take(MAX_MESSAGE_CHARS).collect();
    cut.push_str("\n…");
    cut
}

/// Deliver `message`, logging instead of failing
pub async fn dispatch(sink: &dyn NotificationSink, message: &str) {
    if let Err(e) = sink.send(message).await {
        warn!(error = %e, "Notification delivery failed");
    }
}
