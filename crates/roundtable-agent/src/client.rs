// ABOUTME: Inference backend boundary: the chat client trait and its request/result types.
// ABOUTME: Includes the provider factory resolving a provider name into a configured client.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use roundtable_core::message::{MessageContent, UsageStats};

use crate::context::ContextMessage;
use crate::providers::anthropic::AnthropicChatClient;
use crate::providers::openai::OpenAiChatClient;

/// Errors from the inference backend. These are never retried by the engine;
/// a failed completion fails the turn that requested it.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Provider(String),
}

/// A declared structured-output contract: a named JSON schema the backend is
/// asked to conform to. Agents configured with one expect structured results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// One completion request: role-tagged messages, the optional declared
/// output schema, and a cancellation signal for abandoning the call.
pub struct CompletionRequest<'a> {
    pub messages: &'a [ContextMessage],
    pub schema: Option<&'a ResponseSchema>,
    pub cancel: &'a CancellationToken,
}

/// The final outcome of one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResult {
    pub content: MessageContent,
    pub usage: Option<UsageStats>,
    /// Auxiliary reasoning text, when the backend separates it from content.
    pub thought: Option<String>,
}

/// One event in a streaming completion. A well-behaved stream yields zero or
/// more `Partial` chunks followed by exactly one `Completed`, always last.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    Partial(String),
    Completed(CreateResult),
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionEvent, BackendError>> + Send>>;

/// A client for a language-generation backend. Implementations translate the
/// role-tagged message list into provider API calls.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Run one completion through to its final result.
    async fn create(&self, request: CompletionRequest<'_>) -> Result<CreateResult, BackendError>;

    /// Run one completion as a two-phase stream of partial chunks followed by
    /// the final result. Partial chunks are cosmetic; only the final result
    /// is authoritative.
    fn create_stream(&self, request: CompletionRequest<'_>) -> CompletionStream;
}

/// Create a chat client for the given provider name.
///
/// Returns a tuple of (client, resolved_model). The model is resolved from:
/// 1. The explicit `model` parameter (if Some)
/// 2. A provider-specific environment variable (e.g. OPENAI_MODEL)
/// 3. A sensible default for that provider
pub fn create_chat_client(
    provider: &str,
    model: Option<&str>,
) -> Result<(Arc<dyn ChatClient>, String), BackendError> {
    match provider {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| BackendError::Provider("OPENAI_API_KEY not set".to_string()))?;
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| crate::providers::openai::DEFAULT_BASE_URL.to_string());
            let resolved_model = model
                .map(String::from)
                .or_else(|| std::env::var("OPENAI_MODEL").ok())
                .unwrap_or_else(|| "gpt-4o".to_string());
            let client = OpenAiChatClient::new(api_key, base_url, resolved_model.clone());
            Ok((Arc::new(client), resolved_model))
        }
        "gemini" => {
            // Gemini exposes an OpenAI-compatible endpoint; same adapter,
            // different base URL and credentials.
            let api_key = std::env::var("GEMINI_API_KEY")
                .map_err(|_| BackendError::Provider("GEMINI_API_KEY not set".to_string()))?;
            let base_url = std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
            });
            let resolved_model = model
                .map(String::from)
                .or_else(|| std::env::var("GEMINI_MODEL").ok())
                .unwrap_or_else(|| "gemini-1.5-flash-8b".to_string());
            let client = OpenAiChatClient::new(api_key, base_url, resolved_model.clone());
            Ok((Arc::new(client), resolved_model))
        }
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| BackendError::Provider("ANTHROPIC_API_KEY not set".to_string()))?;
            let base_url = std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| crate::providers::anthropic::DEFAULT_BASE_URL.to_string());
            let resolved_model = model
                .map(String::from)
                .or_else(|| std::env::var("ANTHROPIC_MODEL").ok())
                .unwrap_or_else(|| "claude-sonnet-4-5-20250929".to_string());
            let client = AnthropicChatClient::new(api_key, base_url, resolved_model.clone());
            Ok((Arc::new(client), resolved_model))
        }
        unknown => Err(BackendError::Provider(format!(
            "unsupported inference provider: {unknown}"
        ))),
    }
}
