//! Completion backends
//!
//! - [`OpenAiCompletion`]: OpenAI-compatible Chat Completions over HTTP, with
//!   retry and exponential backoff for transient failures.
//! - [`ExtractiveSummarizer`]: offline stand-in that condenses the new-message
//!   section of a summary request without calling any model.

use crate::backend::{ChatMessage, Completion, CompletionBackend, CompletionOptions, ModelSize};
use crate::config::LlmConfig;
use crate::memory::NEW_MESSAGES_HEADER;
use crate::{RagMemoryError, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const RETRY_BASE_DELAY_MS: u64 = 200;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ─── Chat Completions API types ─────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─── OpenAI-compatible client ───────────────────────────────────────

/// Chat Completions client for any OpenAI-compatible endpoint
pub struct OpenAiCompletion {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    small_model: String,
    max_tokens: u32,
    temperature: f32,
    max_retry_attempts: u32,
}

impl OpenAiCompletion {
    /// Build a client from settings, reading the API key from the configured
    /// environment variable. A missing key is allowed for local servers.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(
                "{} is not set, sending completion requests without auth",
                config.api_key_env
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        if config.max_retry_attempts == 0 {
            return Err(RagMemoryError::InvalidConfig(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("ragmem/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RagMemoryError::Completion(format!("failed to build HTTP client: {}", e)))?;

        info!(
            "Completion backend: base_url={}, model={}, small_model={}",
            config.base_url, config.model, config.small_model
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            small_model: config.small_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_retry_attempts: config.max_retry_attempts,
        })
    }

    fn model_for(&self, size: ModelSize) -> &str {
        match size {
            ModelSize::Default => &self.model,
            ModelSize::Small => &self.small_model,
        }
    }

    /// Exponential backoff with a small deterministic jitter
    fn retry_backoff(attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
        let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
        Duration::from_millis((base_ms as f64 * jitter) as u64)
    }

    fn is_retryable_error(msg: &str) -> bool {
        msg.contains("timeout")
            || msg.contains("network")
            || msg.contains("retryable")
            || msg.contains("error sending request")
            || msg.contains("connection")
    }

    async fn send_request(&self, messages: &[ChatMessage], model: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut req_builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .map_err(Self::map_reqwest_error)?;

        let response = Self::check_response_status(response).await?;

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagMemoryError::Completion(e.to_string()))?;

        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = truncate_chars(&extract_error_detail(&body), 500);
        let kind = if status.is_server_error() {
            "retryable API error"
        } else {
            "API error"
        };
        if detail.is_empty() {
            Err(RagMemoryError::Completion(format!("{kind} {status}")))
        } else {
            Err(RagMemoryError::Completion(format!("{kind} {status}: {detail}")))
        }
    }

    fn map_reqwest_error(e: reqwest::Error) -> RagMemoryError {
        if e.is_timeout() {
            RagMemoryError::Completion(format!("timeout: {e}"))
        } else if e.is_connect() {
            RagMemoryError::Completion(format!("network: {e}"))
        } else {
            RagMemoryError::Completion(e.to_string())
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: CompletionOptions,
    ) -> Result<Completion> {
        let model = self.model_for(opts.model);
        debug!("Completion request: model={}, messages={}", model, messages.len());

        let mut last_err = None;
        for attempt in 0..self.max_retry_attempts {
            if attempt > 0 {
                let delay = Self::retry_backoff(attempt);
                warn!(
                    "Completion request failed (attempt {}/{}), retrying in {:?}...",
                    attempt, self.max_retry_attempts, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_request(messages, model).await {
                Ok(content) => {
                    return Ok(Completion {
                        content: strip_think_tags(&content),
                    })
                }
                Err(e) => {
                    let msg = e.to_string();
                    if Self::is_retryable_error(&msg) && attempt + 1 < self.max_retry_attempts {
                        last_err = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            RagMemoryError::Completion("all retry attempts exhausted".to_string())
        }))
    }
}

fn think_regex() -> &'static Regex {
    static THINK: OnceLock<Regex> = OnceLock::new();
    THINK.get_or_init(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex is valid"))
}

/// Drop `<think>...</think>` reasoning blocks some models emit
fn strip_think_tags(content: &str) -> String {
    let stripped = think_regex().replace_all(content, "");
    if stripped.trim_start().starts_with("<think>") {
        // Unterminated reasoning block, nothing usable follows it
        return String::new();
    }
    stripped.trim().to_string()
}

fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

// ─── Offline summarizer ─────────────────────────────────────────────

/// Longest excerpt kept per message
const EXCERPT_CHARS: usize = 80;

/// Deterministic summarizer that needs no model.
///
/// Understands the request produced by
/// [`summary_request`](crate::memory::summary_request): it pulls the messages
/// out of the "New messages" block and lists who said what.
#[derive(Debug, Default, Clone)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    pub fn new() -> Self {
        Self
    }

    fn new_messages(prompt: &str) -> Option<Vec<serde_json::Value>> {
        let (_, section) = prompt.split_once(NEW_MESSAGES_HEADER)?;
        let (body, _) = section.split_once("\n```")?;
        serde_json::from_str(body.trim()).ok()
    }

    fn excerpt(message: &serde_json::Value) -> Option<String> {
        let name = message.get("name").and_then(|n| n.as_str()).unwrap_or("someone");
        let args = message.get("args")?;
        let text = match args.get("text").and_then(|t| t.as_str()) {
            Some(text) => text.to_string(),
            None if args.is_null() => return None,
            None => args.to_string(),
        };
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(format!("{}: {}", name, truncate_chars(text, EXCERPT_CHARS)))
    }

    pub fn summarize(prompt: &str) -> String {
        match Self::new_messages(prompt) {
            Some(messages) => {
                let excerpts: Vec<String> = messages.iter().filter_map(Self::excerpt).collect();
                if excerpts.is_empty() {
                    String::new()
                } else {
                    format!(
                        "{} messages exchanged. {}",
                        messages.len(),
                        excerpts.join("; ")
                    )
                }
            }
            None => truncate_chars(prompt.trim(), EXCERPT_CHARS * 4),
        }
    }
}

#[async_trait]
impl CompletionBackend for ExtractiveSummarizer {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _opts: CompletionOptions,
    ) -> Result<Completion> {
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Completion {
            content: Self::summarize(&prompt),
        })
    }
}
