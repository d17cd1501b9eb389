//! Chat-completion provider seam and the two analysis prompts built on it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use iw_core::ConceptGraph;

use crate::concept::parse_concept_graph;
use crate::config::LlmConfig;
use crate::json_extract::extract_json_object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-call overrides of the configured generation settings.
#[derive(Debug, Clone, Default)]
pub struct CompletionParams {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no analysis provider configured")]
    NotConfigured,
    #[error("provider call timed out")]
    Timeout,
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("provider rejected the request with status {status}")]
    Rejected { status: u16 },
    #[error("malformed provider output: {0}")]
    Malformed(String),
}

/// Coarse provider failure class. Every class is recovered locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    Timeout,
    Malformed,
    Unavailable,
}

impl LlmError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Timeout => ProviderErrorKind::Timeout,
            Self::Malformed(_) => ProviderErrorKind::Malformed,
            Self::NotConfigured | Self::Unreachable(_) | Self::Rejected { .. } => {
                ProviderErrorKind::Unavailable
            }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Unreachable(e.to_string())
        }
    }
}

/// A text-generation backend answering chat-style prompts.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Client for any server exposing `POST {base_url}/chat/completions`.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for ChatCompletionsClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<String, LlmError> {
        let body = CompletionBody {
            model: &self.model,
            messages,
            max_tokens: params.max_tokens.unwrap_or(self.max_tokens),
            temperature: params.temperature.unwrap_or(self.temperature),
        };
        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Rejected {
                status: status.as_u16(),
            });
        }

        let reply: CompletionReply = response.json().await?;
        reply
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("reply carried no message content".into()))
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}

/// Prose summary of a note.
pub async fn llm_summarize(llm: &dyn LlmProvider, content: &str) -> Result<String, LlmError> {
    let messages = vec![
        ChatMessage::system(
            "You are a concise summarizer for a note-taking application. \
             Produce a clear, factual summary of the note in two to four sentences. \
             Do not add information not present in the note.",
        ),
        ChatMessage::user(format!("Summarize this note:\n\n{content}")),
    ];

    let summary = llm
        .complete(&messages, &CompletionParams::default())
        .await?;
    let summary = summary.trim();
    if summary.is_empty() {
        Err(LlmError::Malformed("empty summary".to_string()))
    } else {
        Ok(summary.to_string())
    }
}

/// Structured concept graph of a note, parsed from the model's JSON.
pub async fn llm_concept_graph(
    llm: &dyn LlmProvider,
    content: &str,
    max_concepts: usize,
) -> Result<ConceptGraph, LlmError> {
    let messages = vec![
        ChatMessage::system(format!(
            "Extract the key concepts of the note and how they relate. \
             Return a JSON object with two fields:\n\
             - \"concepts\": array of {{\"id\", \"label\", \"theme\", \"importance\"}} where theme is one of \
             technology, business, science, philosophy, personal, health and importance is 1, 2 or 3\n\
             - \"relationships\": array of {{\"source\", \"target\", \"label\"}} referencing concept ids\n\
             \n\
             Return ONLY the JSON object, no other text. Max {max_concepts} concepts."
        )),
        ChatMessage::user(content.to_string()),
    ];

    let params = CompletionParams {
        temperature: Some(0.1),
        ..Default::default()
    };

    let raw = llm.complete(&messages, &params).await?;
    let value = extract_json_object(&raw)
        .ok_or_else(|| LlmError::Malformed("no JSON object in response".to_string()))?;
    let graph = parse_concept_graph(&value, max_concepts);
    if graph.is_empty() {
        Err(LlmError::Malformed("concept graph has no concepts".to_string()))
    } else {
        Ok(graph)
    }
}

/// Initialize the LLM provider from config. Returns None when disabled.
pub fn init_llm_provider(config: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    if !config.enabled {
        info!("LLM provider disabled, analysis will use local fallback");
        return None;
    }
    if config.api_key.is_none() {
        info!(base_url = %config.base_url, "LLM provider has no API key, sending unauthenticated requests");
    }
    let provider = ChatCompletionsClient::from_config(config);
    info!(
        provider = provider.name(),
        base_url = %config.base_url,
        model = %config.model,
        "LLM provider initialized"
    );
    Some(Arc::new(provider))
}
