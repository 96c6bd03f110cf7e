use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::directline::{extract_reply, ActivitySet};

/// Reply substituted when the bot produces nothing within the poll budget.
/// Callers must treat this as a normal reply, never as an error.
pub const NO_REPLY_FALLBACK: &str = "no reply available";

/// The conversational backend the relay talks to. A trait so tests can
/// substitute a fake backend for the Direct Line client.
#[async_trait]
pub trait BotBackend: Send + Sync {
    async fn start_conversation(&self) -> Result<String>;

    async fn send_message(&self, conversation_id: &str, sender: &str, text: &str) -> Result<()>;

    async fn poll_activities(
        &self,
        conversation_id: &str,
        watermark: Option<&str>,
    ) -> Result<ActivitySet>;
}

/// Per-sender conversation state. Held in memory for the process lifetime;
/// lost on restart by design.
#[derive(Debug, Default)]
struct Session {
    conversation_id: Option<String>,
    watermark: Option<String>,
}

/// Relays user text to the bot backend and retrieves the reply.
///
/// Each sender gets a session slot behind its own mutex; the slot lock is held
/// for the whole exchange, so two near-simultaneous first-contact messages
/// from the same sender cannot both create a conversation. Different senders
/// proceed independently.
pub struct BotRelay {
    backend: Arc<dyn BotBackend>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl BotRelay {
    pub fn new(backend: Arc<dyn BotBackend>, poll_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            backend,
            sessions: Mutex::new(HashMap::new()),
            poll_attempts,
            poll_interval,
        }
    }

    async fn session_slot(&self, sender: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(sender.to_string()).or_default().clone()
    }

    /// Submit `text` as the sender's message and return the bot's reply.
    ///
    /// Always produces a reply string on the happy path and on poll
    /// exhaustion; an `Err` here means conversation creation or message
    /// submission failed and the caller decides what to substitute.
    pub async fn exchange(&self, sender: &str, text: &str) -> Result<String> {
        let slot = self.session_slot(sender).await;
        let mut session = slot.lock().await;

        let conversation_id = match &session.conversation_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .backend
                    .start_conversation()
                    .await
                    .context("Failed to create bot conversation")?;
                info!("Started conversation {} for sender {}", id, sender);
                session.conversation_id = Some(id.clone());
                id
            }
        };

        self.backend
            .send_message(&conversation_id, sender, text)
            .await
            .context("Failed to submit message to bot")?;

        let mut watermark = session.watermark.clone();
        let mut reply = None;

        for attempt in 1..=self.poll_attempts {
            match self
                .backend
                .poll_activities(&conversation_id, watermark.as_deref())
                .await
            {
                Ok(feed) => {
                    if feed.watermark.is_some() {
                        watermark = feed.watermark.clone();
                    }
                    if let Some(text) = extract_reply(&feed.activities) {
                        debug!("Reply for {} found on poll attempt {}", sender, attempt);
                        reply = Some(text);
                        break;
                    }
                }
                Err(e) => {
                    // A transport failure is a hard stop, not a retry.
                    warn!(
                        "Activity poll failed for {} on attempt {}: {:#}",
                        sender, attempt, e
                    );
                    break;
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        // Polled positions are consumed either way; keep the cursor advanced
        // so a later exchange does not re-read them.
        session.watermark = watermark;

        match reply {
            Some(text) => Ok(text),
            None => {
                warn!("No reply from bot for {} within poll budget", sender);
                Ok(NO_REPLY_FALLBACK.to_string())
            }
        }
    }
}
