//! Convenience re-exports for common `toolloop` types.
//!
//! ```ignore
//! use toolloop::prelude::*;
//! ```
//!
//! Covers what most programs need: message types, the driver and its
//! config, event handlers, retry tuning, usage accounting, tools, the
//! OpenRouter client and the batch classifier. The scripted test service
//! lives in [`api::mock`](crate::api::mock) and is imported from there.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ContentBlock, Message, ModelRequest, ModelResponse, Role, ToolDescriptor, ToolInvocation,
    ToolInvocationOutcome, Usage, json_schema_for,
};
pub use crate::{ClassifyError, DriverError, ServiceError, ToolError};

// ── Driver ──────────────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, ConversationDriver, DriverConfig, DriverEvent, EventHandler,
    FnEventHandler, LoggingHandler, NoopHandler, RunResult, TerminationReason,
};

// ── Model access ────────────────────────────────────────────────────
pub use crate::api::retry::{Backoff, RetryConfig, RetryingInvoker};
pub use crate::api::usage::{SharedUsage, UsageAccountant, UsageSnapshot};
pub use crate::api::{ModelService, OpenRouterClient};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::{FnTool, Tool, ToolFuture, ToolRegistry, parse_input};

// ── Classification ──────────────────────────────────────────────────
pub use crate::classify::{
    BatchClassifier, BatchConfig, BatchObserver, BatchReport, Classifier, FnClassifier,
    ModelRelevanceClassifier, Verdict,
};

pub use crate::logging::init_logging;
