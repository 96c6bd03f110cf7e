use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SpeechConfig;

/// Substituted for the transcript whenever a voice message cannot be
/// understood. Forwarded to the bot as if the user had typed it.
pub const TRANSCRIBE_APOLOGY: &str =
    "Sorry, I couldn't make out that voice message. Could you type it instead?";

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    #[serde(rename = "RecognitionStatus")]
    recognition_status: String,
    #[serde(rename = "DisplayText", default)]
    display_text: Option<String>,
}

/// Downloads a voice recording and runs it through the speech recognition
/// endpoint. Recognition assumes single-channel compressed audio in the
/// configured language.
pub struct TranscriptionClient {
    client: reqwest::Client,
    config: SpeechConfig,
}

impl TranscriptionClient {
    pub fn new(config: SpeechConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build speech HTTP client")?;
        Ok(Self { client, config })
    }

    /// Fetch the media at `media_url` and return the recognized display text.
    /// The download is piped straight into the recognition request body, so
    /// the audio is never buffered wholesale in memory.
    pub async fn transcribe(&self, media_url: &str) -> Result<String> {
        let download = self
            .client
            .get(media_url)
            .send()
            .await
            .context("Failed to download voice media")?;

        let status = download.status();
        if !status.is_success() {
            anyhow::bail!("Voice media download failed ({})", status);
        }

        let audio = reqwest::Body::wrap_stream(download.bytes_stream());

        let url = format!("{}?language={}", self.config.endpoint, self.config.language);

        debug!("Submitting audio from {} for recognition", media_url);

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header("Content-Type", "audio/ogg; codecs=opus")
            .body(audio)
            .send()
            .await
            .context("Failed to call speech recognition endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Speech recognition error ({}): {}", status, body);
        }

        let result: RecognitionResponse = response
            .json()
            .await
            .context("Failed to parse speech recognition response")?;

        if result.recognition_status != "Success" {
            anyhow::bail!("Recognition unsuccessful: {}", result.recognition_status);
        }

        let text = result.display_text.unwrap_or_default();
        if text.is_empty() {
            anyhow::bail!("Recognition returned no text");
        }

        Ok(text)
    }

    /// Best-effort transcription: any failure yields the fixed apology string
    /// so the relay pipeline continues regardless.
    pub async fn transcribe_or_apology(&self, media_url: &str) -> String {
        match self.transcribe(media_url).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed for {}: {:#}", media_url, e);
                TRANSCRIBE_APOLOGY.to_string()
            }
        }
    }
}
