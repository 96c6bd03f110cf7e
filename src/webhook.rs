use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::relay::NO_REPLY_FALLBACK;
use crate::server::{AppState, SharedState};

/// Outbound channel the dispatcher replies through. A trait so tests can
/// count sends without a live messaging provider; the WhatsApp client is the
/// production implementation.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;
}

// ── Inbound payload ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub results: Vec<MessageResult>,
}

#[derive(Debug, Deserialize)]
pub struct MessageResult {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, rename = "messageId")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Option<InboundContent>,
}

#[derive(Debug, Deserialize)]
pub struct InboundContent {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

// ── Classification ──────────────────────────────────────────────────────────

/// The text that will be forwarded to the bot, or where to get it from.
#[derive(Debug, PartialEq)]
pub enum Classified {
    /// Inline text, used verbatim.
    Text(String),
    /// Voice media URL to transcribe.
    Audio(String),
    /// Fixed substitute naming the unsupported type.
    Unsupported(String),
}

/// Classify a message's content into exactly one category. None means a
/// required field is missing and the message is skipped.
pub fn classify(content: &InboundContent) -> Option<Classified> {
    match content.kind.as_deref()? {
        "TEXT" => content.text.clone().map(Classified::Text),
        "AUDIO" => content.url.clone().map(Classified::Audio),
        other => Some(Classified::Unsupported(format!(
            "I received a {} message, which I can't handle yet. Please send text or a voice note.",
            other.to_lowercase()
        ))),
    }
}

// ── Acknowledgment ──────────────────────────────────────────────────────────

/// Per-message result; one transport failure never aborts sibling messages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Bot reply sent back to the sender.
    Delivered,
    /// Required field missing; message ignored.
    Skipped,
    /// No bot reply available; the fixed fallback was sent instead.
    Fallback,
    /// The outbound WhatsApp send failed.
    SendFailed,
}

#[derive(Debug, Serialize)]
pub struct MessageOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub received: usize,
    pub outcomes: Vec<MessageOutcome>,
    pub received_at: String,
}

#[derive(Debug, Serialize)]
pub struct IgnoredAck {
    pub status: &'static str,
    pub error: String,
}

// ── Handler ─────────────────────────────────────────────────────────────────

/// POST /webhook
///
/// Always acknowledges with HTTP 200, even for malformed bodies: the provider
/// retries failed deliveries, and a retry would duplicate every message in
/// the batch.
pub async fn handle_webhook(State(state): State<SharedState>, body: Bytes) -> Response {
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Ignoring malformed webhook payload: {}", e);
            return Json(IgnoredAck {
                status: "ignored",
                error: format!("malformed payload: {}", e),
            })
            .into_response();
        }
    };

    let batch_id = Uuid::new_v4();
    let received = payload.results.len();
    info!("Webhook batch {} with {} result(s)", batch_id, received);

    // Messages are processed sequentially: one message's full cycle completes
    // before the next begins.
    let mut outcomes = Vec::with_capacity(received);
    for result in &payload.results {
        let outcome = process_message(&state, result).await;
        outcomes.push(MessageOutcome {
            sender: result.from.clone(),
            outcome,
        });
    }

    Json(WebhookAck {
        status: "ok",
        received,
        outcomes,
        received_at: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

async fn process_message(state: &AppState, result: &MessageResult) -> Outcome {
    let Some(sender) = result.from.as_deref().filter(|s| !s.trim().is_empty()) else {
        warn!("Skipping message {:?}: no sender", result.message_id);
        return Outcome::Skipped;
    };

    let Some(content) = result.message.as_ref() else {
        warn!("Skipping message from {}: no message body", sender);
        return Outcome::Skipped;
    };

    let Some(classified) = classify(content) else {
        warn!(
            "Skipping message from {}: missing type or content field",
            sender
        );
        return Outcome::Skipped;
    };

    // Whatever classification produced is forwarded as user-authored text;
    // the bot never distinguishes substitutes from real input.
    let text = match classified {
        Classified::Text(text) => text,
        Classified::Audio(url) => state.speech.transcribe_or_apology(&url).await,
        Classified::Unsupported(substitute) => substitute,
    };

    let reply = match state.relay.exchange(sender, &text).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Relay exchange failed for {}: {:#}", sender, e);
            NO_REPLY_FALLBACK.to_string()
        }
    };
    let is_fallback = reply == NO_REPLY_FALLBACK;

    match state.whatsapp.send_text(sender, &reply).await {
        Ok(()) => {
            if is_fallback {
                Outcome::Fallback
            } else {
                Outcome::Delivered
            }
        }
        Err(e) => {
            error!("Failed to send reply to {}: {:#}", sender, e);
            Outcome::SendFailed
        }
    }
}
