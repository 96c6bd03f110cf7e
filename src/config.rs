use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    pub directline: DirectLineConfig,
    pub speech: SpeechConfig,
    #[serde(default = "default_store_config")]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WhatsAppConfig {
    pub base_url: String,
    pub api_key: String,
    /// Our business number, used as the `from` address of every outbound send.
    pub sender: String,
    #[serde(default = "default_whatsapp_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectLineConfig {
    #[serde(default = "default_directline_base_url")]
    pub base_url: String,
    pub secret: String,
    /// How many times to poll the activity feed before giving up on a reply.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_directline_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    /// Full URL of the speech recognition endpoint.
    pub endpoint: String,
    pub api_key: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    /// Optional legacy `User.json` file imported into SQLite at startup.
    #[serde(default)]
    pub legacy_json: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_whatsapp_timeout() -> u64 {
    10
}

fn default_directline_base_url() -> String {
    "https://directline.botframework.com/v3/directline".to_string()
}

fn default_poll_attempts() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    1
}

fn default_directline_timeout() -> u64 {
    10
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_speech_timeout() -> u64 {
    15
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cardline.db")
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_store_config() -> StoreConfig {
    StoreConfig {
        database_path: default_db_path(),
        legacy_json: None,
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}
