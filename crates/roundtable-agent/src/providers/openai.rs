// ABOUTME: OpenAI-compatible Chat Completions adapter implementing the ChatClient trait.
// ABOUTME: Also serves Gemini and other providers exposing the same API shape via base_url.

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

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat Completions API adapter. Works against any endpoint implementing the
/// OpenAI wire format, including Gemini's compatibility endpoint.
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChatClient {
    /// Create a client reading configuration from environment variables.
    /// Required: `OPENAI_API_KEY`
    /// Optional: `OPENAI_BASE_URL` (defaults to https://api.openai.com/v1)
    /// Optional: `OPENAI_MODEL` (defaults to gpt-4o)
    pub fn from_env() -> Result<Self, BackendError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| BackendError::Provider("OPENAI_API_KEY not set".to_string()))?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
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

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Build the JSON request body for the Chat Completions API.
    pub fn build_request_body(&self, request: &CompletionRequest<'_>, stream: bool) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(context_message_json).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(schema) = request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                },
            });
        }

        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }

        body
    }

    /// Parse a non-streaming Chat Completions response into a CreateResult.
    pub fn parse_response(
        response_body: &Value,
        structured: bool,
    ) -> Result<CreateResult, BackendError> {
        let message = response_body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing choices[0].message".to_string())
            })?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing text content in message".to_string())
            })?;

        let thought = message
            .get("reasoning_content")
            .and_then(|t| t.as_str())
            .map(String::from);

        let usage = parse_usage(response_body.get("usage"));

        Ok(finish_result(content.to_string(), usage, thought, structured))
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn create(&self, request: CompletionRequest<'_>) -> Result<CreateResult, BackendError> {
        let body = self.build_request_body(&request, false);
        let structured = request.schema.is_some();

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        let response_body: Value = response.json().await?;
        Self::parse_response(&response_body, structured)
    }

    fn create_stream(&self, request: CompletionRequest<'_>) -> CompletionStream {
        let client = self.client.clone();
        let url = self.completions_url();
        let api_key = self.api_key.clone();
        let body = self.build_request_body(&request, true);
        let structured = request.schema.is_some();
        let cancel = request.cancel.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let outcome =
                stream_completion(client, url, api_key, body, structured, cancel, &tx).await;
            if let Err(err) = outcome {
                let _ = tx.send(Err(err));
            }
        });

        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

/// Drive one streaming request, forwarding content deltas as Partial events
/// and finishing with a Completed event built from the accumulated result.
async fn stream_completion(
    client: reqwest::Client,
    url: String,
    api_key: String,
    body: Value,
    structured: bool,
    cancel: CancellationToken,
    tx: &mpsc::UnboundedSender<Result<CompletionEvent, BackendError>>,
) -> Result<(), BackendError> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;
    let response = check_status(response).await?;

    let mut bytes = response.bytes_stream();
    let mut lines = SseLineBuffer::new();
    let mut content = String::new();
    let mut thought = String::new();
    let mut usage: Option<UsageStats> = None;

    'receive: loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            chunk = bytes.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        lines.push(&chunk?);

        while let Some(data) = lines.next_data() {
            if data == "[DONE]" {
                break 'receive;
            }

            let value: Value = serde_json::from_str(&data)
                .map_err(|e| BackendError::InvalidResponse(format!("bad stream payload: {e}")))?;

            let delta = &value["choices"][0]["delta"];
            if let Some(text) = delta["content"].as_str()
                && !text.is_empty()
            {
                content.push_str(text);
                let _ = tx.send(Ok(CompletionEvent::Partial(text.to_string())));
            }
            if let Some(text) = delta["reasoning_content"].as_str() {
                thought.push_str(text);
            }
            if let Some(sample) = parse_usage(value.get("usage")) {
                usage = Some(sample);
            }
        }
    }

    let thought = (!thought.is_empty()).then_some(thought);
    let _ = tx.send(Ok(CompletionEvent::Completed(finish_result(
        content, usage, thought, structured,
    ))));
    Ok(())
}

/// Map an error status into the backend error taxonomy, pulling the API's
/// own message out of the body when present.
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

fn context_message_json(message: &ContextMessage) -> Value {
    let role = match message.role {
        ContextRole::System => "system",
        ContextRole::User => "user",
        ContextRole::Assistant => "assistant",
    };

    // Structured content travels as its canonical text rendering.
    let mut entry = json!({
        "role": role,
        "content": message.content.as_text(),
    });
    if let Some(source) = &message.source {
        entry["name"] = json!(source);
    }
    entry
}

fn parse_usage(usage: Option<&Value>) -> Option<UsageStats> {
    let usage = usage?;
    let prompt = usage.get("prompt_tokens")?.as_u64()?;
    let completion = usage.get("completion_tokens")?.as_u64()?;
    Some(UsageStats::new(prompt, completion))
}

/// Assemble the final result. Under a declared schema, content that parses
/// as a JSON object is returned structured; otherwise it is left as text for
/// the agent's contract validation to flag.
fn finish_result(
    content: String,
    usage: Option<UsageStats>,
    thought: Option<String>,
    structured: bool,
) -> CreateResult {
    let content = if structured
        && let Ok(value) = serde_json::from_str::<Value>(&content)
        && value.is_object()
    {
        MessageContent::structured(value)
    } else {
        MessageContent::text(content)
    };
    CreateResult {
        content,
        usage,
        thought,
    }
}
