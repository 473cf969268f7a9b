//! Configuration for the [`ConversationDriver`](super::driver::ConversationDriver).
//!
//! ```ignore
//! let config = DriverConfig::new("anthropic/claude-sonnet-4")
//!     .with_max_iterations(30)
//!     .with_max_output_tokens(4096)
//!     .with_thinking_budget(2048)
//!     .with_retries(3);
//! ```

use std::time::Duration;

use crate::DEFAULT_MODEL;
use crate::api::retry::{Backoff, RetryConfig};

/// Default iteration budget for a run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Default output token limit per model call.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Model identifier passed to the service.
    pub model: String,
    /// Maximum model calls in one run.
    pub max_iterations: u32,
    /// Reasoning token budget per call. `0` disables reasoning.
    pub thinking_budget: u32,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Retry policy for transient service failures.
    pub retry: RetryConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl DriverConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            thinking_budget: 0,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: 0.0,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = budget;
        self
    }

    pub fn with_max_output_tokens(mut self, max_tokens: u32) -> Self {
        self.max_output_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Total attempts per model call, keeping the current backoff.
    pub fn with_retries(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Fixed delay between retries instead of exponential backoff.
    pub fn with_fixed_backoff(mut self, delay: Duration) -> Self {
        self.retry.backoff = Backoff::Fixed(delay);
        self.retry.jitter = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.thinking_budget, 0);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn builders_chain() {
        let config = DriverConfig::new("m")
            .with_max_iterations(5)
            .with_thinking_budget(1024)
            .with_max_output_tokens(512)
            .with_retries(4)
            .with_fixed_backoff(Duration::from_secs(1));
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.thinking_budget, 1024);
        assert_eq!(config.max_output_tokens, 512);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff, Backoff::Fixed(Duration::from_secs(1)));
        assert!(!config.retry.jitter);
    }
}
