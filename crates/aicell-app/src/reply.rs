//! Reply pipeline
//!
//! Turns an inbound message into reply text: canned keyword answers first,
//! then an optional remote chat-completion call, then a fixed fallback.

use aicell_core::modem::Modem;
use aicell_core::sms::{truncate_body, InboundHandler, InboundMessage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConsoleConfig, ReplyConfig};

/// Canned answers, checked in order
const KEYWORD_REPLIES: &[(&str, &str)] = &[
    ("hi", "Hello! This is AiCell - your AI-powered SMS assistant."),
    ("hello", "Hello! This is AiCell - your AI-powered SMS assistant."),
    (
        "about aicell",
        "AiCell is an AI-based SMS hotline that provides smart replies without internet. Ask me anything!",
    ),
    (
        "help",
        "Just send your question. I can help with education, health, agriculture, and general info.",
    ),
    ("info", "AiCell: AI via SMS. No internet needed. Free service."),
    ("thanks", "You're welcome! Happy to help."),
    ("thank you", "You're welcome! Feel free to ask more questions."),
    (
        "what is aicell",
        "AiCell is an AI SMS hotline that gives smart replies without internet. Just text me any question!",
    ),
    (
        "who are you",
        "I'm AiCell, your AI SMS assistant. I can help with information, education, health tips, and more!",
    ),
];

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Deserialize)]
struct ChatContent {
    content: String,
}

/// Produces reply text for inbound messages
pub struct ReplyPipeline {
    config: ReplyConfig,
    client: reqwest::Client,
    strip: Regex,
}

impl ReplyPipeline {
    /// Build a pipeline
    pub fn new(config: ReplyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("AiCell/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building HTTP client")?;
        let strip = Regex::new(r"[^\w\s\.\?\!]").context("compiling sanitizer")?;
        Ok(Self {
            config,
            client,
            strip,
        })
    }

    /// Lowercase and drop everything but word characters, whitespace and `.?!`
    pub fn sanitize(&self, text: &str) -> String {
        self.strip
            .replace_all(&text.trim().to_lowercase(), "")
            .into_owned()
    }

    /// Canned answer for an already sanitized message
    pub fn keyword_reply(clean: &str) -> Option<&'static str> {
        let clean = clean.trim();
        KEYWORD_REPLIES
            .iter()
            .find(|(key, _)| *key == clean)
            .or_else(|| KEYWORD_REPLIES.iter().find(|(key, _)| clean.contains(key)))
            .map(|(_, reply)| *reply)
    }

    /// Reply for `text`, at most one message long
    pub async fn reply(&self, text: &str) -> String {
        let clean = self.sanitize(text);

        if let Some(reply) = Self::keyword_reply(&clean) {
            tracing::debug!(message = %clean, "keyword reply");
            return reply.to_string();
        }

        let Some(api_key) = self.config.api_key.as_deref() else {
            return self.config.offline_text.clone();
        };

        match self.remote(api_key, &clean).await {
            Ok(reply) => truncate_body(reply.trim()),
            Err(e) => {
                tracing::warn!("remote reply failed: {:#}", e);
                self.config.fallback_text.clone()
            }
        }
    }

    async fn remote(&self, api_key: &str, text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("sending request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {}", status));
        }

        let body: ChatResponse = response.json().await.context("decoding response")?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("empty completion"))
    }
}

/// Answers every inbound message through the reply pipeline
pub struct AutoReply {
    modem: Modem,
    pipeline: Arc<ReplyPipeline>,
    error_text: String,
}

impl AutoReply {
    /// Create a handler replying through `modem`
    pub fn new(modem: Modem, pipeline: Arc<ReplyPipeline>) -> Self {
        let error_text = pipeline.config.error_text.clone();
        Self {
            modem,
            pipeline,
            error_text,
        }
    }
}

#[async_trait]
impl InboundHandler for AutoReply {
    async fn handle(&self, message: InboundMessage) {
        tracing::info!(sender = %message.sender, body = %message.body, "processing message");
        let mut reply = self.pipeline.reply(&message.body).await;
        if reply.trim().is_empty() {
            reply = self.error_text.clone();
        }

        match self.modem.send_sms(&message.sender, &reply).await {
            Ok(outcome) if outcome.success => {
                tracing::info!(to = %outcome.destination, reply = %reply, "reply sent")
            }
            Ok(outcome) => tracing::warn!(to = %outcome.destination, "reply not sent: {}", outcome.detail),
            Err(e) => tracing::error!(sender = %message.sender, "reply failed: {}", e),
        }
    }
}

/// Console-mode handler: answers "hi" with a fixed text, ignores the rest
pub struct ConsoleReply {
    modem: Modem,
    text: String,
}

impl ConsoleReply {
    /// Create a handler replying through `modem`
    pub fn new(modem: Modem, config: &ConsoleConfig) -> Self {
        Self {
            modem,
            text: config.auto_reply.clone(),
        }
    }
}

#[async_trait]
impl InboundHandler for ConsoleReply {
    async fn handle(&self, message: InboundMessage) {
        println!("\nSMS from {}: {}", message.sender, message.body);
        if message.body.trim().to_lowercase() != "hi" {
            return;
        }
        match self.modem.send_sms(&message.sender, &self.text).await {
            Ok(outcome) if outcome.success => println!("Auto-reply sent to {}", outcome.destination),
            Ok(outcome) => println!("Auto-reply failed: {}", outcome.detail),
            Err(e) => println!("Auto-reply failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicell_core::config::ModemConfig;
    use aicell_core::simulator::{SimulatedModem, SimulatorProbe, SimulatorProfile};
    use aicell_core::sms::Dispatcher;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn pipeline() -> ReplyPipeline {
        ReplyPipeline::new(ReplyConfig::default()).unwrap()
    }

    fn message(body: &str) -> InboundMessage {
        InboundMessage {
            sender: "+8801712345678".to_string(),
            body: body.to_string(),
            header: String::new(),
            sent_at: None,
            received_at: Utc::now(),
        }
    }

    fn simulated() -> (Modem, SimulatorProbe) {
        let config = ModemConfig {
            health_check_secs: 0,
            ..ModemConfig::default()
        };
        let sim = SimulatedModem::new(SimulatorProfile::default());
        let probe = sim.probe();
        (Modem::with_transport(Box::new(sim), None, &config), probe)
    }

    #[test]
    fn test_sanitize() {
        let p = pipeline();
        assert_eq!(p.sanitize("  What is AiCell?!  "), "what is aicell?!");
        assert_eq!(p.sanitize("hi :) #1"), "hi  1");
        assert_eq!(p.sanitize("কেমন আছ?"), "কেমন আছ?");
    }

    #[test]
    fn test_keyword_exact_then_substring() {
        assert_eq!(
            ReplyPipeline::keyword_reply("thank you"),
            Some("You're welcome! Feel free to ask more questions.")
        );
        assert_eq!(
            ReplyPipeline::keyword_reply("please help me"),
            Some("Just send your question. I can help with education, health, agriculture, and general info.")
        );
        assert_eq!(ReplyPipeline::keyword_reply("rice prices"), None);
    }

    #[tokio::test]
    async fn test_offline_fallback() {
        let p = pipeline();
        assert_eq!(
            p.reply("best fertilizer for rice").await,
            "AiCell here! Ask about health, education, or farming."
        );
        assert_eq!(
            p.reply("Hello!").await,
            "Hello! This is AiCell - your AI-powered SMS assistant."
        );
    }

    #[tokio::test]
    async fn test_unreachable_remote_uses_fallback() {
        let p = ReplyPipeline::new(ReplyConfig {
            api_key: Some("test-key".to_string()),
            url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            timeout_secs: 2,
            ..ReplyConfig::default()
        })
        .unwrap();
        assert_eq!(
            p.reply("best fertilizer for rice").await,
            "Thanks for your message! I'll reply soon."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_reply_sends_to_sender() {
        let (modem, probe) = simulated();
        let handler = Arc::new(AutoReply::new(modem.clone(), Arc::new(pipeline())));
        let monitor = modem.start_monitor(Dispatcher::new(handler));

        probe.inject_incoming("+8801712345678", "who are you");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let sent = probe.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "+8801712345678");
        assert!(sent[0].body.starts_with("I'm AiCell"));
        monitor.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_reply_only_answers_hi() {
        let (modem, probe) = simulated();
        let handler = ConsoleReply::new(modem.clone(), &ConsoleConfig::default());
        let monitor = modem.start_monitor(Dispatcher::logging_only());

        handler.handle(message("what time is it")).await;
        assert!(probe.sent().is_empty());

        handler.handle(message(" Hi ")).await;
        assert_eq!(probe.sent()[0].body, "I am Sim800C GSM module");
        monitor.shutdown().await.unwrap();
    }
}
