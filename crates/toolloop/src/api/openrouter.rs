//! [`ModelService`] backed by the OpenRouter chat-completions API.
//!
//! Translates the block-structured [`Message`] history into the
//! OpenAI-compatible wire shape and back. Tool results become `tool` role
//! messages keyed by `tool_call_id`; the thinking budget is sent as
//! `reasoning.max_tokens`.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::retry::is_transient_status;
use super::service::{ModelFuture, ModelService};
use crate::error::ServiceError;
use crate::{ContentBlock, Message, ModelRequest, ModelResponse, Role, ToolDescriptor, Usage};

/// OpenRouter chat completions endpoint.
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<WireReasoning>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

#[derive(Serialize, Debug)]
struct WireReasoning {
    max_tokens: u32,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".into()
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Serialize, Debug)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Serialize, Debug)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
    reasoning: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

#[derive(Deserialize, Debug)]
struct RawUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

// ── Conversion ─────────────────────────────────────────────────────

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Flatten one block-structured message into one or more wire messages.
fn to_wire_messages(message: &Message) -> Vec<WireMessage> {
    let mut out = Vec::new();
    let mut text = Vec::new();
    let mut calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text: t } => text.push(t.as_str()),
            // Reasoning is never replayed to the provider.
            ContentBlock::Reasoning { .. } => {}
            ContentBlock::ToolInvocationRequest(req) => calls.push(WireToolCall {
                id: req.id.clone(),
                call_type: function_type(),
                function: WireFunctionCall {
                    name: req.tool_name.clone(),
                    arguments: req.input.to_string(),
                },
            }),
            ContentBlock::ToolInvocationResult(res) => {
                let content = if res.is_error && !res.content.starts_with("Error") {
                    format!("Error: {}", res.content)
                } else {
                    res.content.clone()
                };
                out.push(WireMessage {
                    role: "tool",
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(res.id.clone()),
                });
            }
        }
    }

    if !text.is_empty() || !calls.is_empty() {
        out.push(WireMessage {
            role: role_str(message.role),
            content: if text.is_empty() {
                None
            } else {
                Some(text.join("\n"))
            },
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            tool_call_id: None,
        });
    }
    out
}

fn to_wire_tool(desc: &ToolDescriptor) -> WireTool<'_> {
    WireTool {
        tool_type: "function",
        function: WireFunctionDef {
            name: &desc.name,
            description: &desc.description,
            parameters: &desc.input_schema,
        },
    }
}

fn from_raw_message(message: RawResponseMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    if let Some(reasoning) = message.reasoning.filter(|r| !r.is_empty()) {
        blocks.push(ContentBlock::Reasoning { text: reasoning });
    }
    if let Some(text) = message.content.filter(|t| !t.trim().is_empty()) {
        blocks.push(ContentBlock::Text { text });
    }
    for call in message.tool_calls.unwrap_or_default() {
        let args = call.function.arguments;
        let input = if args.trim().is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&args).unwrap_or(serde_json::Value::String(args))
        };
        blocks.push(ContentBlock::tool_request(call.id, call.function.name, input));
    }
    blocks
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ServiceError> {
        Self::with_headers(api_key, "https://github.com/toolloop-rs", "toolloop")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .user_agent("toolloop/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ServiceError::fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            url: OPENROUTER_URL.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    async fn send(&self, request: &ModelRequest) -> Result<ModelResponse, ServiceError> {
        let body = WireRequest {
            model: &request.model,
            messages: request.messages.iter().flat_map(to_wire_messages).collect(),
            tools: request.tools.iter().map(to_wire_tool).collect(),
            max_tokens: request.max_output_tokens,
            temperature: request.temperature,
            reasoning: (request.thinking_budget > 0).then_some(WireReasoning {
                max_tokens: request.thinking_budget,
            }),
        };

        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, thinking_budget={}",
            request.model,
            body.messages.len(),
            body.tools.len(),
            request.max_output_tokens,
            request.thinking_budget,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(&body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ServiceError::transient(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        check_status(status, &text)?;
        parse_response(&text)
    }
}

/// A request that never got a response. Only a malformed request is fatal.
fn request_error(e: reqwest::Error) -> ServiceError {
    if e.is_builder() {
        ServiceError::fatal(format!("request failed: {e}"))
    } else {
        ServiceError::transient(format!("request failed: {e}"))
    }
}

fn check_status(status: StatusCode, body: &str) -> Result<(), ServiceError> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("OpenRouter API HTTP {status}: {body}");
    Err(if is_transient_status(status.as_u16()) {
        ServiceError::Transient(message)
    } else {
        ServiceError::Fatal(message)
    })
}

/// Decode a successful HTTP body into a [`ModelResponse`].
fn parse_response(text: &str) -> Result<ModelResponse, ServiceError> {
    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| ServiceError::fatal(format!("failed to parse response: {e}")))?;

    if let Some(err) = parsed.error {
        let message = format!("OpenRouter API error: {}", err.message);
        return Err(match err.code {
            Some(code) if is_transient_status(code) => ServiceError::Transient(message),
            _ => ServiceError::Fatal(message),
        });
    }

    let usage = parsed.usage.map(|u| Usage {
        input_tokens: u.prompt_tokens.unwrap_or(0),
        output_tokens: u.completion_tokens.unwrap_or(0),
    });
    if let Some(u) = usage {
        debug!(
            "Token usage: input={}, output={}",
            u.input_tokens, u.output_tokens
        );
    }

    let content = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .map(|c| from_raw_message(c.message))
        .unwrap_or_default();

    Ok(ModelResponse { content, usage })
}

impl ModelService for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        Box::pin(self.send(request))
    }
}
