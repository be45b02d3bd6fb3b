// AI collaborator client.
//
// Speaks the OpenAI-compatible chat-completions shape, so any
// conforming endpoint works (hosted APIs, vLLM, Ollama). Callers treat
// every failure the same way: substitute the fixed unavailability reply.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};

use palaver_common::types::{AiMode, Message};

/// Display name on every assistant-authored message.
pub const ASSISTANT_SENDER: &str = "AI Assistant";

/// Reply used whenever the collaborator call fails or is unconfigured.
pub const UNAVAILABLE_REPLY: &str = "AI is currently unavailable.";

/// Upper bound on reply length requested from the model.
const MAX_REPLY_TOKENS: u32 = 200;

/// Bounded wait for a generation call; expiry is treated as failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("no API key configured")]
    Unconfigured,

    #[error("generation endpoint rate limited")]
    RateLimited,

    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation response was unusable: {0}")]
    Malformed(String),
}

pub type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AssistantError>> + Send + 'a>>;

/// Seam for the external text-generation collaborator, so the dispatcher
/// and scheduler can be exercised without a network endpoint.
pub trait Collaborator: Send + Sync {
    fn generate<'a>(&'a self, transcript: &'a [Message], mode: AiMode) -> GenerateFuture<'a>;
}

/// Fixed instruction template per AI mode.
pub fn system_prompt(mode: AiMode) -> &'static str {
    match mode {
        AiMode::Summarizer => "Summarize the following chat messages concisely:",
        AiMode::Brainstorm => "Based on these messages, suggest 3 creative ideas:",
        AiMode::Moderator => "Keep this discussion on topic. Respond helpfully:",
        AiMode::Research => "Answer the question based on these messages:",
    }
}

/// Render an ordered transcript as `sender: text` lines.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.sender, message.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct AssistantClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl AssistantClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers
            .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));

        let client = Client::builder().default_headers(headers).timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self { client, base_url: base_url.into(), api_key, model: model.into() })
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(
        &self,
        transcript: &[Message],
        mode: AiMode,
    ) -> Result<String, AssistantError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AssistantError::Unconfigured);
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system", content: system_prompt(mode).to_owned() },
                ChatMessage { role: "user", content: render_transcript(transcript) },
            ],
            max_tokens: MAX_REPLY_TOKENS,
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .header(header::AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(|error| AssistantError::Request(error.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(AssistantError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Request(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| AssistantError::Malformed(error.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AssistantError::Malformed("no completion content".to_owned()))
    }
}

impl Collaborator for AssistantClient {
    fn generate<'a>(&'a self, transcript: &'a [Message], mode: AiMode) -> GenerateFuture<'a> {
        Box::pin(self.complete(transcript, mode))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
