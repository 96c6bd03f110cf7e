use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DirectLineConfig;
use crate::relay::BotBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    pub from: ChannelAccount,
}

/// One page of the conversation's activity feed, with the cursor to resume from.
#[derive(Debug, Clone)]
pub struct ActivitySet {
    pub activities: Vec<Activity>,
    pub watermark: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutgoingActivity<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    from: SenderRef<'a>,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SenderRef<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct StartConversationResponse {
    #[serde(rename = "conversationId")]
    conversation_id: String,
}

#[derive(Debug, Deserialize)]
struct ActivityFeedResponse {
    #[serde(default)]
    activities: Vec<Activity>,
    #[serde(default)]
    watermark: Option<String>,
}

/// Client for a Direct Line-style conversational bot backend.
pub struct DirectLineClient {
    client: reqwest::Client,
    config: DirectLineConfig,
}

impl DirectLineClient {
    pub fn new(config: DirectLineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Direct Line HTTP client")?;
        Ok(Self { client, config })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.secret)
    }

    /// Build the activity-feed GET. The watermark is an opaque cursor, so it
    /// goes through the query builder to get percent-encoded rather than
    /// being spliced into the URL.
    fn poll_request(
        &self,
        conversation_id: &str,
        watermark: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/conversations/{}/activities",
            self.config.base_url, conversation_id
        );

        let mut request = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header());
        if let Some(watermark) = watermark {
            request = request.query(&[("watermark", watermark)]);
        }
        request
    }
}

#[async_trait]
impl BotBackend for DirectLineClient {
    async fn start_conversation(&self) -> Result<String> {
        let url = format!("{}/conversations", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Failed to start bot conversation")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bot backend error on conversation start ({}): {}", status, body);
        }

        let started: StartConversationResponse = response
            .json()
            .await
            .context("Failed to parse conversation start response")?;

        Ok(started.conversation_id)
    }

    async fn send_message(&self, conversation_id: &str, sender: &str, text: &str) -> Result<()> {
        let url = format!(
            "{}/conversations/{}/activities",
            self.config.base_url, conversation_id
        );

        let activity = OutgoingActivity {
            kind: "message",
            from: SenderRef { id: sender },
            text,
        };

        debug!("Posting user activity to conversation {}", conversation_id);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&activity)
            .send()
            .await
            .context("Failed to post activity to bot backend")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bot backend error on activity post ({}): {}", status, body);
        }

        Ok(())
    }

    async fn poll_activities(
        &self,
        conversation_id: &str,
        watermark: Option<&str>,
    ) -> Result<ActivitySet> {
        let response = self
            .poll_request(conversation_id, watermark)
            .send()
            .await
            .context("Failed to poll bot activity feed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Bot backend error on activity poll ({}): {}", status, body);
        }

        let feed: ActivityFeedResponse = response
            .json()
            .await
            .context("Failed to parse activity feed response")?;

        Ok(ActivitySet {
            activities: feed.activities,
            watermark: feed.watermark,
        })
    }
}

/// Assemble the bot's reply from one page of the activity feed: the
/// space-joined text of every message activity not authored by the user.
/// Returns None when the page holds no qualifying activity.
pub fn extract_reply(activities: &[Activity]) -> Option<String> {
    let parts: Vec<&str> = activities
        .iter()
        .filter(|a| a.kind == "message")
        .filter(|a| a.from.role.as_deref() != Some("user"))
        .filter_map(|a| a.text.as_deref())
        .filter(|t| !t.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> DirectLineClient {
        DirectLineClient::new(DirectLineConfig {
            base_url: "https://bots.example/v3/directline".to_string(),
            secret: "secret".to_string(),
            poll_attempts: 10,
            poll_interval_secs: 1,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_poll_url_percent_encodes_the_watermark() {
        let request = test_client()
            .poll_request("conv-1", Some("a b/c&d=e"))
            .build()
            .unwrap();

        let url = request.url();
        assert_eq!(url.path(), "/v3/directline/conversations/conv-1/activities");
        // No reserved characters survive unencoded in the query string.
        let query = url.query().unwrap();
        assert!(!query.contains(' '));
        assert!(!query.contains('&'));
        // And the cursor round-trips intact.
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![("watermark".to_string(), "a b/c&d=e".to_string())]
        );
    }

    #[test]
    fn test_poll_url_omits_query_without_watermark() {
        let request = test_client().poll_request("conv-1", None).build().unwrap();
        assert_eq!(request.url().query(), None);
    }

    fn activity(kind: &str, text: Option<&str>, role: Option<&str>) -> Activity {
        Activity {
            kind: kind.to_string(),
            text: text.map(str::to_string),
            from: ChannelAccount {
                id: "someone".to_string(),
                role: role.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_extract_reply_joins_bot_messages_with_spaces() {
        let activities = vec![
            activity("message", Some("Hello!"), Some("bot")),
            activity("message", Some("How can I help?"), Some("bot")),
        ];
        assert_eq!(
            extract_reply(&activities).as_deref(),
            Some("Hello! How can I help?")
        );
    }

    #[test]
    fn test_extract_reply_skips_user_echo() {
        let activities = vec![
            activity("message", Some("my own message"), Some("user")),
            activity("message", Some("the reply"), Some("bot")),
        ];
        assert_eq!(extract_reply(&activities).as_deref(), Some("the reply"));
    }

    #[test]
    fn test_extract_reply_skips_non_message_activities() {
        let activities = vec![
            activity("typing", None, Some("bot")),
            activity("event", Some("ignored"), None),
        ];
        assert_eq!(extract_reply(&activities), None);
    }

    #[test]
    fn test_extract_reply_accepts_missing_role() {
        // Some backends omit the role on bot activities; only an explicit
        // "user" role disqualifies.
        let activities = vec![activity("message", Some("hi"), None)];
        assert_eq!(extract_reply(&activities).as_deref(), Some("hi"));
    }

    #[test]
    fn test_extract_reply_empty_feed() {
        assert_eq!(extract_reply(&[]), None);
    }

    #[test]
    fn test_activity_feed_deserializes() {
        let json = r#"{
            "activities": [
                {"type": "message", "text": "Welcome", "from": {"id": "bot-1", "role": "bot"}}
            ],
            "watermark": "42"
        }"#;
        let feed: ActivityFeedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(feed.activities.len(), 1);
        assert_eq!(feed.watermark.as_deref(), Some("42"));
        assert_eq!(feed.activities[0].text.as_deref(), Some("Welcome"));
    }

    #[test]
    fn test_outgoing_activity_serializes() {
        let activity = OutgoingActivity {
            kind: "message",
            from: SenderRef { id: "+385991234567" },
            text: "Hello",
        };
        let json = serde_json::to_string(&activity).unwrap();
        assert!(json.contains(r#""type":"message""#));
        assert!(json.contains(r#""id":"+385991234567""#));
        assert!(json.contains(r#""text":"Hello""#));
    }
}
