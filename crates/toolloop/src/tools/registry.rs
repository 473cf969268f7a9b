//! Tool abstraction and name-keyed dispatch.
//!
//! The [`Tool`] trait defines what every tool provides: a static
//! [`ToolDescriptor`] (name, description, input schema) and an async
//! `execute` over a JSON value. Tools are collected into a [`ToolRegistry`]
//! which handles lookup, optional schema validation, timeouts, panic
//! isolation, and result truncation. Adding a tool never touches the driver.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::ToolDescriptor;
use crate::error::ToolError;

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + 'a>>;

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke.
///
/// # Example
///
/// ```ignore
/// struct ReadFile { workdir: PathBuf }
///
/// impl Tool for ReadFile {
///     fn descriptor(&self) -> ToolDescriptor { /* ... */ }
///
///     fn execute(&self, input: serde_json::Value) -> ToolFuture<'_> {
///         Box::pin(async move {
///             let args: ReadFileArgs = parse_input("read_file", input)?;
///             std::fs::read_to_string(self.workdir.join(args.path))
///                 .map_err(|e| ToolError::execution(e.to_string()))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// What the model is told about this tool.
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool. Errors are reported back to the model as error results;
    /// they never abort the conversation.
    fn execute(&self, input: Value) -> ToolFuture<'_>;

    fn name(&self) -> String {
        self.descriptor().name
    }
}

// ── ToolRegistry ───────────────────────────────────────────────────

/// Name → tool lookup table, built once before a run.
///
/// # Example
///
/// ```ignore
/// let tools = ToolRegistry::new()
///     .with_max_result_bytes(15_000)
///     .with_input_validation(true)
///     .with_default_timeout(Some(Duration::from_secs(30)))
///     .with(ReadFile::new(workdir))
///     .with_if(allow_writes, WriteFile::new(workdir));
///
/// let descriptors = tools.descriptors();
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    max_result_bytes: usize,
    validate_input: bool,
    default_timeout: Option<Duration>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("max_result_bytes", &self.max_result_bytes)
            .field("validate_input", &self.validate_input)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            validate_input: false,
            default_timeout: None,
        }
    }

    /// Set the maximum result size in bytes before truncation.
    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    /// Validate inputs against each tool's JSON Schema before execution.
    pub fn with_input_validation(mut self, enabled: bool) -> Self {
        self.validate_input = enabled;
        self
    }

    /// Per-call timeout for every tool. `None` disables timeouts.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name();
        if self.tools.insert(name.clone(), Box::new(tool)).is_some() {
            debug!("Tool '{name}' re-registered, previous definition replaced");
        }
    }

    /// Register a closure over raw JSON input.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        self.register(FnTool::raw(
            ToolDescriptor::new(name, description, input_schema),
            handler,
        ));
    }

    /// Register a tool (builder pattern).
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// All descriptors, sorted by name so the tool list sent to the model is
    /// stable between calls.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descs: Vec<ToolDescriptor> = self.tools.values().map(|t| t.descriptor()).collect();
        descs.sort_by(|a, b| a.name.cmp(&b.name));
        descs
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up `name` and run it with `input`.
    ///
    /// Panics inside the tool are caught and reported as
    /// [`ToolError::Panicked`]. Successful output is truncated to
    /// `max_result_bytes`.
    pub async fn dispatch(&self, name: &str, input: Value) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        if self.validate_input {
            validate_input(tool.as_ref(), &input)?;
        }

        log_tool_call(name, &input);
        let start = Instant::now();

        // The future is built inside the async block so a panic while
        // constructing it is caught too.
        let guarded = AssertUnwindSafe(async move { tool.execute(input).await }).catch_unwind();

        let outcome = match self.default_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(r) => r,
                Err(_) => {
                    info!(
                        "Tool {name} timed out after {:.1}s (limit: {:.0}s)",
                        start.elapsed().as_secs_f64(),
                        limit.as_secs_f64(),
                    );
                    return Err(ToolError::Timeout {
                        tool: name.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => guarded.await,
        };

        let result = match outcome {
            Ok(r) => r,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                info!("Tool {name} panicked: {message}");
                return Err(ToolError::Panicked {
                    tool: name.to_string(),
                    message,
                });
            }
        };

        match &result {
            Ok(output) => {
                debug!(
                    "Tool {name} completed in {:.0}ms ({} bytes)",
                    start.elapsed().as_secs_f64() * 1000.0,
                    output.len()
                );
                trace!(
                    "Tool {name} result preview: {}",
                    output.chars().take(300).collect::<String>()
                );
            }
            Err(e) => debug!("Tool {name} failed: {e}"),
        }

        result.map(|output| truncate_result(output, self.max_result_bytes))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> + Send + Sync,
>;

/// A closure-based tool.
///
/// Use [`FnTool::new`] for typed arguments parsed with serde, or
/// [`FnTool::raw`] to receive the JSON input untouched. For tools that need
/// shared state, implement [`Tool`] on a struct instead.
///
/// # Example
///
/// ```
/// use toolloop::tools::{FnTool, ToolRegistry};
/// use toolloop::{json_schema_for, ToolDescriptor};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoArgs {
///     /// Text to echo back.
///     text: String,
/// }
///
/// let tool = FnTool::new(
///     ToolDescriptor::new("echo", "Echo the input", json_schema_for::<EchoArgs>()),
///     |args: EchoArgs| async move { Ok(args.text) },
/// );
/// let tools = ToolRegistry::new().with(tool);
/// assert!(tools.contains("echo"));
/// ```
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: ErasedToolHandler,
}

impl FnTool {
    /// Typed handler. Input that fails to deserialize into `A` becomes
    /// [`ToolError::InvalidInput`].
    pub fn new<A, F, Fut>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        let tool_name = descriptor.name.clone();
        let erased = move |input: Value| -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>> {
            match parse_input::<A>(&tool_name, input) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(e) }),
            }
        };

        Self {
            descriptor,
            handler: Box::new(erased),
        }
    }

    /// Handler over the raw JSON input.
    pub fn raw<F, Fut>(descriptor: ToolDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        Self {
            descriptor,
            handler: Box::new(move |input| Box::pin(handler(input))),
        }
    }
}

impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    fn execute(&self, input: Value) -> ToolFuture<'_> {
        (self.handler)(input)
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.descriptor.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Deserialize tool input into a typed struct.
pub fn parse_input<T: serde::de::DeserializeOwned>(tool: &str, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
        tool: tool.to_string(),
        message: format!("{e}. Provide JSON matching the tool's input schema."),
    })
}

/// Validate tool input against the tool's declared JSON Schema.
///
/// An invalid schema skips validation rather than failing the call.
pub fn validate_input(tool: &dyn Tool, input: &Value) -> Result<(), ToolError> {
    let descriptor = tool.descriptor();
    let Ok(validator) = jsonschema::validator_for(&descriptor.input_schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidInput {
            tool: descriptor.name,
            message: format!(
                "argument validation failed:\n{}\nFix the arguments and try again.",
                errors.join("\n")
            ),
        })
    }
}

/// Log a tool call at INFO level with a truncated preview of the input.
pub fn log_tool_call(name: &str, input: &Value) {
    let raw = input.to_string();
    let preview: String = raw.chars().take(120).collect();
    info!(
        "[tool] {}({preview}{})",
        name,
        if raw.chars().count() > 120 { "..." } else { "" }
    );
    trace!("[tool] {name} input: {raw}");
}

/// Truncate a string to at most `max` bytes on a char boundary, appending a
/// notice if trimmed.
pub fn truncate_result(mut s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let total = s.len();
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s.push_str(&format!("...\n[truncated: {total} bytes total]"));
    s
}

/// Best-effort message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
