//! The conversation driver and everything it needs around one run.
//!
//! - [`driver`]: [`ConversationDriver`] and its per-run [`LoopState`].
//! - [`config`]: [`DriverConfig`] budgets and retry policy.
//! - [`events`]: [`DriverEvent`], [`EventHandler`] implementations, and
//!   the [`RunResult`] a run produces.
//! - `execution`: sending one iteration's request and executing one turn's
//!   tool requests.

pub mod config;
pub mod driver;
pub mod events;
mod execution;

pub use config::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_OUTPUT_TOKENS, DriverConfig};
pub use driver::{ConversationDriver, LoopState};
pub use events::{
    CompositeEventHandler, DID_NOT_COMPLETE_TEXT, DriverEvent, EventHandler, FnEventHandler,
    LoggingHandler, NoopHandler, RunResult, TerminationReason,
};
