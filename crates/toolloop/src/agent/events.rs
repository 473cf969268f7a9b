//! Events, handlers, and run results for the
//! [`ConversationDriver`](super::driver::ConversationDriver).
//!
//! The driver reports every step of a run through [`DriverEvent`] variants,
//! from the first model call through tool execution to termination. Callers
//! implement [`EventHandler`] to observe them for logging, progress display,
//! or metrics. Handlers are observers only; they cannot steer the loop.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Message;
use crate::api::usage::UsageSnapshot;

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the driver during a run.
#[derive(Debug)]
pub enum DriverEvent<'a> {
    /// The run is starting.
    RunStarted {
        trace_id: &'a str,
        max_iterations: u32,
    },
    /// A new iteration is starting (1-based).
    IterationStart { iteration: u32, max_iterations: u32 },
    /// Reasoning content from the model. Informational only.
    Reasoning(&'a str),
    /// Text from the model (may be alongside tool requests).
    Text(&'a str),
    /// The model requested tool invocations this iteration.
    ToolCallsReceived { iteration: u32, count: usize },
    /// A request reused an id already seen in the same turn and was dropped.
    DuplicateRequestDropped { id: &'a str, name: &'a str },
    /// A single tool is about to run.
    ToolExecuting {
        name: &'a str,
        id: &'a str,
        input: &'a serde_json::Value,
    },
    /// A single tool finished, successfully or not.
    ToolResult {
        name: &'a str,
        id: &'a str,
        result: &'a str,
        is_error: bool,
    },
    /// Token usage reported for this iteration's model call.
    TokenUsage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The model call reported no usage; counted as zero.
    UsageMissing { iteration: u32 },
    /// The model returned neither text nor tool requests. The iteration is
    /// consumed and nothing is appended to history.
    EmptyResponse { iteration: u32 },
    /// The model produced a final answer.
    Finished { iterations: u32 },
    /// The iteration budget ran out before a final answer.
    IterationLimitReached { max_iterations: u32 },
}

/// Handler for driver events.
///
/// # Example
///
/// ```ignore
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &DriverEvent<'_>) {
///         if let DriverEvent::ToolResult { name, result, .. } = event {
///             eprintln!("[{name}] {} bytes", result.len());
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &DriverEvent<'_>) {
        let _ = event;
    }
}

impl<H: EventHandler + ?Sized> EventHandler for &H {
    fn on_event(&self, event: &DriverEvent<'_>) {
        (**self).on_event(event);
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let DriverEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&DriverEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&DriverEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&DriverEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &DriverEvent<'_>) {
        (self.0)(event)
    }
}

/// Delegates every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, progress_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &DriverEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let head: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        format!("{head}...")
    } else {
        head
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &DriverEvent<'_>) {
        match event {
            DriverEvent::RunStarted {
                trace_id,
                max_iterations,
            } => {
                info!("Run {trace_id} started (max {max_iterations} iterations)");
            }
            DriverEvent::IterationStart {
                iteration,
                max_iterations,
            } => {
                info!("[iteration {iteration}/{max_iterations}]");
            }
            DriverEvent::Reasoning(text) => {
                debug!("LLM reasoning: {}", preview(text, 200));
            }
            DriverEvent::Text(text) => {
                debug!("LLM text: {}", preview(text, 200));
            }
            DriverEvent::ToolCallsReceived { iteration, count } => {
                debug!("{count} tool call(s) in iteration {iteration}");
            }
            DriverEvent::DuplicateRequestDropped { id, name } => {
                warn!("Dropped duplicate tool request id={id} ({name})");
            }
            DriverEvent::ToolExecuting { name, id, .. } => {
                debug!("Executing tool: {name} (id={id})");
            }
            DriverEvent::ToolResult {
                name,
                result,
                is_error,
                ..
            } => {
                if *is_error {
                    info!("Tool {name} failed: {}", preview(result, 200));
                } else {
                    debug!("Tool {name} result: {} bytes", result.len());
                }
            }
            DriverEvent::TokenUsage {
                input_tokens,
                output_tokens,
            } => {
                debug!("Tokens: input={input_tokens}, output={output_tokens}");
            }
            DriverEvent::UsageMissing { iteration } => {
                warn!("No usage reported for iteration {iteration}; counted as zero");
            }
            DriverEvent::EmptyResponse { iteration } => {
                warn!("Empty model response at iteration {iteration} (no text, no tool calls)");
            }
            DriverEvent::Finished { iterations } => {
                info!("Finished after {iterations} iteration(s)");
            }
            DriverEvent::IterationLimitReached { max_iterations } => {
                info!("Hit iteration limit ({max_iterations})");
            }
        }
    }
}

// ── Run result ─────────────────────────────────────────────────────

/// Text returned when the iteration budget runs out.
pub const DID_NOT_COMPLETE_TEXT: &str =
    "The conversation did not complete within the allowed number of iterations.";

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model produced a final text answer.
    Completed,
    /// The iteration budget was exhausted first.
    MaxIterations,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Completed => write!(f, "completed"),
            TerminationReason::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// The result of a complete
/// [`ConversationDriver::run`](super::driver::ConversationDriver::run).
#[derive(Debug, Clone)]
pub struct RunResult {
    pub trace_id: String,
    /// The final answer, or [`DID_NOT_COMPLETE_TEXT`] on exhaustion.
    pub final_text: String,
    pub usage: UsageSnapshot,
    pub termination: TerminationReason,
    pub iterations: u32,
    /// Every message of the run, including the initial ones.
    pub history: Vec<Message>,
}

impl RunResult {
    pub fn completed(&self) -> bool {
        self.termination == TerminationReason::Completed
    }
}
