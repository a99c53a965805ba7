//! LLM client (C2): chat-completion operations used for Q&A and summarization.
//!
//! The request/response shape follows the OpenAI-compatible chat-completions
//! API (same `messages`/`choices` contract as an OpenAI-style provider);
//! retries reuse the embedding client's backoff loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::RagError;

const STAGE: &str = "llm";
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_FACTOR: u64 = 2;
const MAX_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Deterministic-enough Q&A completion (low temperature).
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String, RagError>;

    /// Summarizes `body` per `instruction`, honoring `target_length_ratio`
    /// as an instruction and truncating the result at 1.2x the target
    /// character length before returning.
    async fn summarize(&self, instruction: &str, body: &str, target_length_ratio: f64) -> Result<String, RagError>;
}

pub struct OpenAiLlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build llm http client");
        Self { client, config }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, system_prompt: &str, user_message: &str) -> Result<String, RagError> {
        let messages = vec![
            ChatMessage { role: "system", content: system_prompt.to_string() },
            ChatMessage { role: "user", content: user_message.to_string() },
        ];
        chat_with_retry_and_timeout(&self.client, &self.config, messages, 0.3).await
    }

    async fn summarize(&self, instruction: &str, body: &str, target_length_ratio: f64) -> Result<String, RagError> {
        let prompt = format!(
            "{instruction}\n\nTarget compression ratio: {target_length_ratio:.2} (output length should be at most that fraction of the input length).\n\nText:\n{body}"
        );
        let messages = vec![
            ChatMessage { role: "system", content: "You produce faithful, compressed summaries.".to_string() },
            ChatMessage { role: "user", content: prompt },
        ];
        let summary = chat_with_retry_and_timeout(&self.client, &self.config, messages, 0.2).await?;
        Ok(truncate_to_ratio(&summary, body.chars().count(), target_length_ratio))
    }
}

/// Truncates `summary` so it never exceeds 1.2x the target length implied
/// by `source_len * ratio`.
fn truncate_to_ratio(summary: &str, source_len: usize, ratio: f64) -> String {
    let max_len = ((source_len as f64) * ratio * 1.2).ceil() as usize;
    if summary.chars().count() <= max_len {
        return summary.to_string();
    }
    summary.chars().take(max_len).collect()
}

async fn chat_with_retry_and_timeout(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
    temperature: f32,
) -> Result<String, RagError> {
    let call = chat_with_retry(client, config, messages, temperature);
    match tokio::time::timeout(config.timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RagError::LlmTimeout { stage: STAGE }),
    }
}

async fn chat_with_retry(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: Vec<ChatMessage>,
    temperature: f32,
) -> Result<String, RagError> {
    let mut last_err: Option<anyhow::Error> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match try_chat_once(client, config, &messages, temperature).await {
            Ok(text) => return Ok(text),
            Err(e) if is_retryable(&e) => {
                tracing::warn!(attempt, error = %e, "llm request failed, retrying");
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    let backoff = BACKOFF_BASE_MS * BACKOFF_FACTOR.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
            Err(e) => return Err(RagError::upstream(STAGE, e.to_string())),
        }
    }

    Err(RagError::upstream(
        STAGE,
        last_err.map(|e| e.to_string()).unwrap_or_else(|| "llm request failed after retries".to_string()),
    ))
}

async fn try_chat_once(
    client: &reqwest::Client,
    config: &LlmConfig,
    messages: &[ChatMessage],
    temperature: f32,
) -> anyhow::Result<String> {
    let api_key = config.api_key.as_deref().unwrap_or_default();
    let body = ChatRequest {
        model: config.model.clone(),
        messages: messages.iter().map(|m| ChatMessage { role: m.role, content: m.content.clone() }).collect(),
        temperature,
    };

    let response = client
        .post("https://api.openai.com/v1/chat/completions")
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("llm provider returned {status}: {text}");
    }

    let parsed: ChatResponse = response.json().await?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("llm provider returned no choices"))
}

fn is_retryable(e: &anyhow::Error) -> bool {
    let msg = e.to_string();
    if msg.contains("returned 429") || msg.contains("returned 5") {
        return true;
    }
    if let Some(source) = e.downcast_ref::<reqwest::Error>() {
        return source.is_timeout() || source.is_connect();
    }
    false
}

/// `DEMO_MODE` stub: echoes the first 200 characters of the user-facing
/// input. No network call, no retries.
pub struct DemoLlmClient;

#[async_trait]
impl LlmClient for DemoLlmClient {
    async fn complete(&self, _system_prompt: &str, user_message: &str) -> Result<String, RagError> {
        Ok(echo_200(user_message))
    }

    async fn summarize(&self, _instruction: &str, body: &str, target_length_ratio: f64) -> Result<String, RagError> {
        Ok(truncate_to_ratio(&echo_200(body), body.chars().count(), target_length_ratio))
    }
}

fn echo_200(text: &str) -> String {
    text.chars().take(200).collect()
}

pub fn create_client(config: &crate::config::Config) -> std::sync::Arc<dyn LlmClient> {
    if config.demo_mode {
        std::sync::Arc::new(DemoLlmClient)
    } else {
        std::sync::Arc::new(OpenAiLlmClient::new(config.llm.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_client_echoes_first_200_chars() {
        let client = DemoLlmClient;
        let long = "x".repeat(500);
        let out = client.complete("system", &long).await.unwrap();
        assert_eq!(out.chars().count(), 200);
    }

    #[test]
    fn truncation_respects_1_2x_target() {
        let source_len = 1000;
        let ratio = 0.1; // target 100 chars
        let summary = "y".repeat(300);
        let truncated = truncate_to_ratio(&summary, source_len, ratio);
        assert!(truncated.chars().count() <= 120);
    }

    #[test]
    fn truncation_is_noop_when_already_short() {
        let summary = "short".to_string();
        let truncated = truncate_to_ratio(&summary, 1000, 0.1);
        assert_eq!(truncated, "short");
    }
}
