//! Application configuration (`aicell.json`)
//!
//! Every field has a default; a missing file means all defaults.

use aicell_core::config::ModemConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable holding the remote reply API key
pub const API_KEY_ENV: &str = "AICELL_REPLY_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Modem connection and protocol settings
    pub modem: ModemConfig,
    /// HTTP status server
    pub server: ServerConfig,
    /// Reply generation
    pub reply: ReplyConfig,
    /// Interactive console
    pub console: ConsoleConfig,
}

/// HTTP status server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hotline number reported by `/health`
    pub hotline: String,
    /// Bind address
    pub host: String,
    /// First port tried
    pub port_range_start: u16,
    /// Number of ports tried
    pub port_scan_len: u16,
    /// Port used when none in the range is free
    pub fallback_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hotline: "+8801833890003".to_string(),
            host: "0.0.0.0".to_string(),
            port_range_start: 5000,
            port_scan_len: 100,
            fallback_port: 5000,
        }
    }
}

/// Reply pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Remote text-generation key; remote replies are off without it
    pub api_key: Option<String>,
    /// OpenAI-compatible chat completions endpoint
    pub url: String,
    /// Model name
    pub model: String,
    /// System prompt
    pub system_prompt: String,
    /// Token cap for remote replies
    pub max_tokens: u32,
    /// Remote request timeout in seconds
    pub timeout_secs: u64,
    /// Reply when nothing matched and remote generation is off
    pub offline_text: String,
    /// Reply when remote generation failed
    pub fallback_text: String,
    /// Reply when handling a message failed
    pub error_text: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "meta-llama/llama-3.1-8b-instruct:free".to_string(),
            system_prompt: "You are AiCell SMS bot. Reply in <140 chars. Simple Bangla/English."
                .to_string(),
            max_tokens: 80,
            timeout_secs: 20,
            offline_text: "AiCell here! Ask about health, education, or farming.".to_string(),
            fallback_text: "Thanks for your message! I'll reply soon.".to_string(),
            error_text: "Sorry, try again.".to_string(),
        }
    }
}

/// Interactive console settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Number offered when the prompt is left empty
    pub default_phone: String,
    /// Reply sent to an incoming "hi"
    pub auto_reply: String,
    /// How long a test call is held, in seconds
    pub call_hold_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            default_phone: "+8801518979969".to_string(),
            auto_reply: "I am Sim800C GSM module".to_string(),
            call_hold_secs: 20,
        }
    }
}

impl AppConfig {
    /// Load `path`, or defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.reply.api_key = Some(key.trim().to_string());
            }
        }
        Ok(config)
    }
}
