//! Telegram Bot API sender

use super::Notifier;
use crate::config::TelegramConfig;
use crate::error::{SnoozeError, SnoozeResult};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    config: TelegramConfig,
    client: Client,
    api_base: String,
    retry_delay: Duration,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig, request_timeout: Duration) -> SnoozeResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SnoozeError::Notification(format!("HTTP client: {}", e)))?;

        Ok(Self {
            api_base: format!("{}/bot{}", TELEGRAM_API, config.bot_token),
            config,
            client,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Point at a self-hosted Bot API server
    pub fn with_api_url(mut self, url: &str) -> Self {
        self.api_base = format!("{}/bot{}", url.trim_end_matches('/'), self.config.bot_token);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn send_once(&self, text: &str) -> Result<(), String> {
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&json!({
                "chat_id": self.config.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("status {}", resp.status()))
        }
    }
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.config.chat_id)
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) -> SnoozeResult<()> {
        if !self.config.is_configured() {
            let preview: String = message.chars().take(200).collect();
            info!("Telegram not configured, would send: {}", preview);
            return Ok(());
        }

        let mut last_error = String::new();
        for attempt in 1..=MAX_RETRIES {
            match self.send_once(message).await {
                Ok(()) => {
                    debug!("Telegram message delivered on attempt {}", attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Telegram send attempt {}/{} failed: {}",
                        attempt, MAX_RETRIES, e
                    );
                    last_error = e;
                }
            }

            if attempt < MAX_RETRIES {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        Err(SnoozeError::Notification(format!(
            "giving up after {} attempts: {}",
            MAX_RETRIES, last_error
        )))
    }
}
