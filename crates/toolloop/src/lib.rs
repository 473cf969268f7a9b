//! Tool-use conversation driver and bounded parallel batch classifier.
//!
//! `toolloop` runs the classic agent pattern: send the conversation to a
//! model service, let the model request tool invocations, execute them
//! locally, append the results, and repeat until the model answers with
//! plain text or the iteration budget runs out. On top of that loop sits a
//! [`BatchClassifier`](classify::BatchClassifier) that asks the model many
//! independent yes/no questions in bounded-size concurrent batches.
//!
//! # Getting started
//!
//! ```ignore
//! use toolloop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let api_key = std::env::var("OPENROUTER_KEY").map_err(|e| e.to_string())?;
//!     let client = OpenRouterClient::new(api_key).map_err(|e| e.to_string())?;
//!
//!     let tools = ToolRegistry::new().with(MyTool);
//!     let config = DriverConfig::new("anthropic/claude-sonnet-4")
//!         .with_max_iterations(20)
//!         .with_thinking_budget(2048);
//!
//!     let messages = vec![
//!         Message::system("You are a helpful assistant."),
//!         Message::user("Which files implement the parser?"),
//!     ];
//!
//!     let result = ConversationDriver::new(&client, &tools, config)
//!         .with_event_handler(&LoggingHandler)
//!         .run(messages)
//!         .await
//!         .map_err(|e| e.to_string())?;
//!
//!     println!("{}", result.final_text);
//!     println!("{}", result.usage.summary());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **The loop:** [`ConversationDriver`](agent::driver::ConversationDriver)
//!   and [`DriverConfig`](agent::config::DriverConfig). Observe it with an
//!   [`EventHandler`](agent::events::EventHandler).
//! - **Tools:** the [`Tool`](tools::Tool) trait, [`FnTool`](tools::FnTool)
//!   for closures, and [`ToolRegistry`](tools::ToolRegistry) for lookup and
//!   dispatch.
//! - **Model access:** the [`ModelService`](api::ModelService) seam, the
//!   [`OpenRouterClient`](api::OpenRouterClient) implementation, and the
//!   [`ScriptedService`](api::mock::ScriptedService) used in tests.
//! - **Retries:** [`RetryingInvoker`](api::retry::RetryingInvoker) with a
//!   fixed or exponential [`Backoff`](api::retry::Backoff).
//! - **Batch classification:** [`classify`].
//! - **Usage accounting:** [`UsageAccountant`](api::usage::UsageAccountant).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`agent`] | Conversation driver, config, events, tool-turn execution |
//! | [`tools`] | `Tool` trait, `FnTool`, `ToolRegistry` |
//! | [`api`] | `ModelService`, OpenRouter client, retry, usage accounting |
//! | [`classify`] | Batched concurrent classification with fail-closed defaults |
//! | [`logging`] | `tracing` layer that writes timestamped lines to stderr |

pub mod agent;
pub mod api;
pub mod classify;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod tools;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use error::{ClassifyError, DriverError, ServiceError, ToolError};

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Maximum output tokens for one-shot classification sub-queries.
pub const CLASSIFICATION_MAX_TOKENS: u32 = 256;

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. This is the bridge between strong Rust types and
/// the input schema a [`ToolDescriptor`] advertises to the model.
///
/// # Example
///
/// ```
/// use toolloop::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GrepArgs {
///     pattern: String,
///     #[serde(default)]
///     path: Option<String>,
/// }
///
/// let schema = json_schema_for::<GrepArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"pattern".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// The caller's answer to one [`ToolInvocation`], matched by `id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ToolInvocationOutcome {
    pub id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolInvocationOutcome {
    pub fn success(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One block of message content.
///
/// `Reasoning` is carried through for observability only; the driver never
/// branches on it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Reasoning { text: String },
    ToolInvocationRequest(ToolInvocation),
    ToolInvocationResult(ToolInvocationOutcome),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        ContentBlock::Reasoning { text: text.into() }
    }

    pub fn tool_request(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        ContentBlock::ToolInvocationRequest(ToolInvocation {
            id: id.into(),
            tool_name: tool_name.into(),
            input,
        })
    }
}

/// A message in the conversation. History is an append-only `Vec<Message>`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::text(content)],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(content)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// The caller turn that answers a model turn's tool requests.
    pub fn tool_results(results: Vec<ToolInvocationOutcome>) -> Self {
        Self {
            role: Role::User,
            content: results
                .into_iter()
                .map(ContentBlock::ToolInvocationResult)
                .collect(),
        }
    }

    /// Concatenated `Text` blocks, or `None` if the message has no text.
    pub fn text(&self) -> Option<String> {
        collect_text(&self.content)
    }

    /// Tool requests in the order they appear.
    pub fn tool_requests(&self) -> Vec<&ToolInvocation> {
        collect_requests(&self.content)
    }

    /// Tool results in the order they appear.
    pub fn tool_results_iter(&self) -> impl Iterator<Item = &ToolInvocationOutcome> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolInvocationResult(r) => Some(r),
            _ => None,
        })
    }
}

fn collect_text(blocks: &[ContentBlock]) -> Option<String> {
    let parts: Vec<&str> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn collect_requests(blocks: &[ContentBlock]) -> Vec<&ToolInvocation> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolInvocationRequest(req) => Some(req),
            _ => None,
        })
        .collect()
}

// ── Tool descriptors ───────────────────────────────────────────────

/// What the model is told about a tool: its name, what it does, and the
/// JSON Schema of its input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

// ── Model request / response ──────────────────────────────────────

/// A single call to the model service.
#[derive(Serialize, Clone, Debug, Default)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
    /// Token budget for reasoning / extended thinking. `0` disables it.
    pub thinking_budget: u32,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// Token usage reported for one model call.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The model's reply to a [`ModelRequest`].
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    /// `None` when the provider did not report usage.
    pub usage: Option<Usage>,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            usage: None,
        }
    }

    /// Attach usage (builder pattern).
    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Some(Usage {
            input_tokens,
            output_tokens,
        });
        self
    }

    /// Append a content block (builder pattern).
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    /// Concatenated text blocks, if any.
    pub fn final_text(&self) -> Option<String> {
        collect_text(&self.content)
    }

    pub fn tool_requests(&self) -> Vec<&ToolInvocation> {
        collect_requests(&self.content)
    }

    /// Concatenated reasoning blocks, if any.
    pub fn reasoning(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Reasoning { text } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}
