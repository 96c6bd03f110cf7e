use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::WhatsAppConfig;
use crate::webhook::MessageSender;

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    from: &'a str,
    to: &'a str,
    content: TextContent<'a>,
}

#[derive(Debug, Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

/// Canonical recipient form: trimmed, with a leading plus sign. Inbound and
/// outbound addressing must agree on this, so it is enforced on every send.
pub fn normalize_recipient(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else {
        format!("+{}", trimmed)
    }
}

/// Outbound WhatsApp messaging client.
pub struct WhatsAppClient {
    client: reqwest::Client,
    config: WhatsAppConfig,
}

impl WhatsAppClient {
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build WhatsApp HTTP client")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl MessageSender for WhatsAppClient {
    /// Send a text message to `to`. Failures propagate to the caller; this is
    /// the terminal step of the relay pipeline and is never swallowed.
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let to = normalize_recipient(to);
        let url = format!("{}/whatsapp/1/message/text", self.config.base_url);

        let request = SendTextRequest {
            from: &self.config.sender,
            to: &to,
            content: TextContent { text },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("App {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .context("Failed to send WhatsApp message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("WhatsApp send error ({}): {}", status, body);
        }

        debug!("Sent WhatsApp reply to {}", to);
        Ok(())
    }
}
