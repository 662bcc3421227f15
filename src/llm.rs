//! Groq API client for narrative generation and loop reasoning
//!
//! Uses a long-lived reqwest::Client for connection pooling and an
//! explicit per-request timeout, so a stuck upstream call cannot hang
//! a session indefinitely.

use crate::error::AgentError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, info};

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Language-generation capability consumed by the orchestrator and the
/// sub-agents. Callers never assume well-formed structure from the
/// reply; defensive parsing happens at every consumption site.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String>;
}

/// Reusable Groq client (connection-pooled)
pub struct GroqClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl GroqClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: GROQ_CHAT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 4096,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LanguageModel for GroqClient {
    async fn complete(&self, messages: &[ChatMessage]) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(AgentError::Config(
                "GROQ_API_KEY not configured".to_string(),
            ));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        info!(model = %self.model, turns = messages.len(), "Calling Groq API");

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Groq API request failed: {}", e);
                AgentError::Llm(format!("Groq API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Groq API error response: {}", error_text);
            return Err(AgentError::Llm(format!("Groq API error: {}", error_text)));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Groq response: {}", e);
            AgentError::Llm(format!("Groq parse error: {}", e))
        })?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Llm("No choices in Groq response".to_string()))?;

        Ok(choice.message.content)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Deterministic stub for development & testing.
/// Replays a fixed script of replies in order; once exhausted it
/// repeats the last entry.
pub struct ScriptedLlm {
    replies: Vec<String>,
    cursor: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: replies.into_iter().map(String::from).collect(),
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, _messages: &[ChatMessage]) -> crate::Result<String> {
        if self.replies.is_empty() {
            return Err(AgentError::Llm("scripted LLM has no replies".to_string()));
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .get(index)
            .or_else(|| self.replies.last())
            .cloned()
            .unwrap_or_default();
        Ok(reply)
    }
}

/// Stub that fails every call, for exercising degraded paths.
pub struct FailingLlm;

#[async_trait]
impl LanguageModel for FailingLlm {
    async fn complete(&self, _messages: &[ChatMessage]) -> crate::Result<String> {
        Err(AgentError::Llm("language model unreachable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![
                ChatMessage::system("You are a market analyst"),
                ChatMessage::user("What is RSI?"),
            ],
            temperature: 0.2,
            max_tokens: 4096,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("What is RSI?"));
        assert!(json.contains("\"role\":\"system\""));
    }

    #[tokio::test]
    async fn scripted_llm_replays_in_order_then_repeats_last() {
        let llm = ScriptedLlm::new(vec!["one", "two"]);
        assert_eq!(llm.complete(&[]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
        assert_eq!(llm.complete(&[]).await.unwrap(), "two");
    }

    #[tokio::test]
    async fn failing_llm_always_errors() {
        let llm = FailingLlm;
        assert!(llm.complete(&[]).await.is_err());
    }
}
