//! Model service access: the [`ModelService`] trait, the OpenRouter client,
//! retry policy, and usage accounting.

pub mod mock;
pub mod openrouter;
pub mod retry;
pub mod service;
pub mod usage;

pub use openrouter::OpenRouterClient;
pub use service::{ModelFuture, ModelService};
