// ABOUTME: Anthropic Messages API adapter implementing the ChatClient trait.
// ABOUTME: Maps system entries to the system field and content blocks to text/thought.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use roundtable_core::message::{MessageContent, UsageStats};

use crate::client::{
    BackendError, ChatClient, CompletionEvent, CompletionRequest, CompletionStream, CreateResult,
};
use crate::context::{ContextMessage, ContextRole};
use crate::providers::SseLineBuffer;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API adapter. The Messages API has no structured-output
/// mode, so requests declaring a schema are rejected up front.
pub struct AnthropicChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicChatClient {
    /// Create a client reading configuration from environment variables.
    /// Required: `ANTHROPIC_API_KEY`
    /// Optional: `ANTHROPIC_BASE_URL`, `ANTHROPIC_MODEL`
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| BackendError::Provider("ANTHROPIC_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string());
        Ok(Self::new(api_key, base_url, model))
    }

    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    /// Build the JSON request body for the Messages API. System entries are
    /// concatenated into the top-level system field; the rest become the
    /// messages array.
    pub fn build_request_body(&self, messages: &[ContextMessage], stream: bool) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ContextRole::System)
            .map(|m| match &m.content {
                MessageContent::Text { text } => text.as_str(),
                MessageContent::Structured { .. } => "",
            })
            .collect();

        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != ContextRole::System)
            .map(|m| {
                let role = match m.role {
                    ContextRole::Assistant => "assistant",
                    _ => "user",
                };
                json!({"role": role, "content": m.content.as_text()})
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": turns,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Parse a non-streaming Messages API response: text blocks concatenate
    /// into content, thinking blocks into the auxiliary thought.
    pub fn parse_response(response_body: &Value) -> Result<CreateResult, BackendError> {
        let blocks = response_body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing content array in response".to_string())
            })?;

        let mut content = String::new();
        let mut thought = String::new();
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        content.push_str(text);
                    }
                }
                Some("thinking") => {
                    if let Some(text) = block.get("thinking").and_then(|t| t.as_str()) {
                        thought.push_str(text);
                    }
                }
                _ => {}
            }
        }

        if content.is_empty() {
            return Err(BackendError::InvalidResponse(
                "no text content block in response".to_string(),
            ));
        }

        let usage = parse_usage(response_body.get("usage"));
        Ok(CreateResult {
            content: MessageContent::text(content),
            usage,
            thought: (!thought.is_empty()).then_some(thought),
        })
    }
}

#[async_trait]
impl ChatClient for AnthropicChatClient {
    async fn create(&self, request: CompletionRequest<'_>) -> Result<CreateResult, BackendError> {
        if request.schema.is_some() {
            return Err(BackendError::Provider(
                "structured output is not supported by the anthropic adapter".to_string(),
            ));
        }
        let body = self.build_request_body(request.messages, false);

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let response_body: Value = response.json().await?;
        Self::parse_response(&response_body)
    }

    fn create_stream(&self, request: CompletionRequest<'_>) -> CompletionStream {
        if request.schema.is_some() {
            return Box::pin(futures::stream::iter([Err(BackendError::Provider(
                "structured output is not supported by the anthropic adapter".to_string(),
            ))]));
        }

        let client = self.client.clone();
        let url = self.messages_url();
        let api_key = self.api_key.clone();
        let body = self.build_request_body(request.messages, true);
        let cancel = request.cancel.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let outcome = stream_completion(client, url, api_key, body, cancel, &tx).await;
            if let Err(err) = outcome {
                let _ = tx.send(Err(err));
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Drive one streaming Messages request. Text deltas become Partial events;
/// message_stop finishes the accumulated result.
async fn stream_completion(
    client: reqwest::Client,
    url: String,
    api_key: String,
    body: Value,
    cancel: CancellationToken,
    tx: &mpsc::UnboundedSender<Result<CompletionEvent, BackendError>>,
) -> Result<(), BackendError> {
    let response = client
        .post(url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&body)
        .send()
        .await?;
    let response = check_status(response).await?;

    let mut bytes = response.bytes_stream();
    let mut lines = SseLineBuffer::new();
    let mut content = String::new();
    let mut thought = String::new();
    let mut prompt_tokens = 0u64;
    let mut completion_tokens = 0u64;

    'receive: loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = bytes.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        lines.push(&chunk?);

        while let Some(data) = lines.next_data() {
            let value: Value = serde_json::from_str(&data)
                .map_err(|e| BackendError::InvalidResponse(format!("bad stream payload: {e}")))?;

            match value.get("type").and_then(|t| t.as_str()) {
                Some("message_start") => {
                    if let Some(tokens) = value["message"]["usage"]["input_tokens"].as_u64() {
                        prompt_tokens = tokens;
                    }
                }
                Some("content_block_delta") => {
                    let delta = &value["delta"];
                    match delta.get("type").and_then(|t| t.as_str()) {
                        Some("text_delta") => {
                            if let Some(text) = delta["text"].as_str() {
                                content.push_str(text);
                                let _ = tx.send(Ok(CompletionEvent::Partial(text.to_string())));
                            }
                        }
                        Some("thinking_delta") => {
                            if let Some(text) = delta["thinking"].as_str() {
                                thought.push_str(text);
                            }
                        }
                        _ => {}
                    }
                }
                Some("message_delta") => {
                    if let Some(tokens) = value["usage"]["output_tokens"].as_u64() {
                        completion_tokens = tokens;
                    }
                }
                Some("message_stop") => break 'receive,
                Some("error") => {
                    let message = value["error"]["message"]
                        .as_str()
                        .unwrap_or("unknown stream error")
                        .to_string();
                    return Err(BackendError::Provider(message));
                }
                _ => {}
            }
        }
    }

    let _ = tx.send(Ok(CompletionEvent::Completed(CreateResult {
        content: MessageContent::text(content),
        usage: Some(UsageStats::new(prompt_tokens, completion_tokens)),
        thought: (!thought.is_empty()).then_some(thought),
    })));
    Ok(())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(BackendError::RateLimited);
    }

    let message = match response.json::<Value>().await {
        Ok(body) => body["error"]["message"]
            .as_str()
            .unwrap_or("no error message in response body")
            .to_string(),
        Err(_) => "unreadable error body".to_string(),
    };
    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}

fn parse_usage(usage: Option<&Value>) -> Option<UsageStats> {
    let usage = usage?;
    let prompt = usage.get("input_tokens")?.as_u64()?;
    let completion = usage.get("output_tokens")?.as_u64()?;
    Some(UsageStats::new(prompt, completion))
}
