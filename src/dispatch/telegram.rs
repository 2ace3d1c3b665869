//! Telegram Bot API sink

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::ChatSink;
use crate::config::TelegramConfig;
use crate::error::{Error, Result};

/// Sends HTML-formatted messages through `sendMessage`
pub struct TelegramSink {
    client: Client,
    api_base: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetMeReply {
    ok: bool,
    result: Option<BotUser>,
}

impl TelegramSink {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms * 2))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.bot_token
            ),
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Bot username, used by the health check
    pub async fn get_me(&self) -> Result<String> {
        let reply: GetMeReply = self
            .client
            .get(format!("{}/getMe", self.api_base))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::DeliveryFailed(format!("getMe request failed: {}", e)))?
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("getMe reply: {}", e)))?;

        if !reply.ok {
            return Err(Error::DeliveryFailed("getMe rejected (check bot token)".to_string()));
        }
        Ok(reply
            .result
            .and_then(|u| u.username)
            .unwrap_or_else(|| "(unnamed)".to_string()))
    }
}

/// Map a `sendMessage` reply onto the delivery outcome
fn interpret_reply(status: StatusCode, reply: Option<ApiReply>) -> Result<()> {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || reply.as_ref().and_then(|r| r.error_code) == Some(429);

    if rate_limited {
        let retry_after_secs = reply
            .as_ref()
            .and_then(|r| r.parameters.as_ref())
            .and_then(|p| p.retry_after);
        return Err(Error::RateLimited { retry_after_secs });
    }

    match reply {
        Some(r) if r.ok && status.is_success() => Ok(()),
        Some(r) => Err(Error::DeliveryFailed(format!(
            "Telegram {} ({}): {}",
            r.error_code.unwrap_or(status.as_u16()),
            status,
            r.description.unwrap_or_default()
        ))),
        None => Err(Error::DeliveryFailed(format!(
            "Telegram HTTP {} with unreadable body",
            status
        ))),
    }
}

#[async_trait]
impl ChatSink for TelegramSink {
    async fn send(&self, destination: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": destination,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(format!("{}/sendMessage", self.api_base))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::DeliveryFailed(format!("sendMessage request failed: {}", e)))?;

        let status = response.status();
        let reply = response.json::<ApiReply>().await.ok();
        debug!(chat = %destination, status = %status, "sendMessage answered");
        interpret_reply(status, reply)
    }
}
