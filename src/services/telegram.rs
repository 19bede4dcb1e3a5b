// src/services/telegram.rs

//! Telegram Bot API chat endpoint.
//!
//! Sends messages via `POST /bot<token>/sendMessage`. Responses that point
//! at a bad token or chat are reported as [`AppError::Auth`] so the
//! start-of-run self-check can tell a broken setup from a flaky send.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::TelegramConfig;
use crate::services::Notifier;
use crate::utils::truncate_chars;

/// Telegram `sendMessage` text limit (UTF-16 code units after entity parsing).
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Telegram notification endpoint.
pub struct TelegramNotifier {
    client: Client,
    url: String,
    chat_id: String,
    parse_mode: String,
    disable_preview: bool,
}

impl TelegramNotifier {
    /// Create a notifier with its own HTTP client.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
            chat_id: config.chat_id.clone(),
            parse_mode: config.parse_mode.clone(),
            disable_preview: config.disable_preview,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": self.parse_mode,
            "disable_web_page_preview": self.disable_preview,
        });

        // Never log `self.url`: it embeds the bot token.
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::delivery(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }

    fn max_message_len(&self) -> Option<usize> {
        Some(TELEGRAM_MESSAGE_LIMIT)
    }
}

/// Map a failed `sendMessage` response to an error.
pub fn classify_failure(status: StatusCode, body: &str) -> AppError {
    let message = format!("HTTP {status}: {}", truncate_chars(body, 200));
    let rejected = matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
    ) || (status == StatusCode::BAD_REQUEST
        && body.to_ascii_lowercase().contains("chat not found"));

    if rejected {
        AppError::auth(message)
    } else {
        AppError::delivery(message)
    }
}
