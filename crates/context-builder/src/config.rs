//! Context-builder configuration.
//!
//! [`BuilderConfig`] holds what the CLI collects and converts it into
//! toolloop types via [`build_driver_config`](BuilderConfig::build_driver_config),
//! [`build_batch_config`](BuilderConfig::build_batch_config) and
//! [`build_registry`](BuilderConfig::build_registry).

use std::path::PathBuf;
use std::sync::Arc;

use toolloop::DEFAULT_MODEL;
use toolloop::agent::{DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_OUTPUT_TOKENS, DriverConfig};
use toolloop::api::ModelService;
use toolloop::api::usage::SharedUsage;
use toolloop::classify::BatchConfig;
use toolloop::classify::batch::{DEFAULT_BATCH_SIZE, DEFAULT_CLASSIFY_ATTEMPTS};
use toolloop::tools::ToolRegistry;

use crate::context::ContextSet;
use crate::tools::{ContextToolsExt, DetermineRelevance};

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Model for the driver. Default: [`DEFAULT_MODEL`].
    pub model: String,
    /// Model for relevance sub-queries. Defaults to `model`.
    pub classifier_model: Option<String>,
    /// Root for every file tool. Default: `"."`.
    pub workdir: PathBuf,
    /// Driver iteration budget.
    pub max_rounds: u32,
    pub max_tokens: u32,
    pub thinking_budget: u32,
    pub temperature: f32,
    /// Concurrent relevance classifications.
    pub batch_size: usize,
    /// Attempts per model call, for both the driver and the classifier.
    pub retries: u32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            classifier_model: None,
            workdir: PathBuf::from("."),
            max_rounds: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            thinking_budget: 0,
            temperature: 0.0,
            batch_size: DEFAULT_BATCH_SIZE,
            retries: DEFAULT_CLASSIFY_ATTEMPTS,
        }
    }
}

impl BuilderConfig {
    pub fn build_driver_config(&self) -> DriverConfig {
        DriverConfig::new(self.model.clone())
            .with_max_iterations(self.max_rounds)
            .with_max_output_tokens(self.max_tokens)
            .with_thinking_budget(self.thinking_budget)
            .with_temperature(self.temperature)
            .with_retries(self.retries)
    }

    pub fn build_batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_batch_size(self.batch_size)
            .with_max_attempts(self.retries)
    }

    /// All five context tools, sharing `context` and counting classifier
    /// tokens into `usage`.
    pub fn build_registry(
        &self,
        service: Arc<dyn ModelService>,
        context: ContextSet,
        usage: Arc<SharedUsage>,
    ) -> ToolRegistry {
        let classifier_model = self
            .classifier_model
            .clone()
            .unwrap_or_else(|| self.model.clone());
        let relevance = DetermineRelevance::new(
            self.workdir.clone(),
            service,
            classifier_model,
            context.clone(),
        )
        .batch_config(self.build_batch_config())
        .usage(usage);

        ToolRegistry::new()
            .with_context_tools(self.workdir.clone(), context)
            .with(relevance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolloop::api::mock::ScriptedService;

    #[test]
    fn defaults() {
        let config = BuilderConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_rounds, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.retries, 3);
    }

    #[test]
    fn flags_flow_into_library_configs() {
        let config = BuilderConfig {
            max_rounds: 7,
            thinking_budget: 1024,
            batch_size: 4,
            retries: 5,
            ..Default::default()
        };

        let driver = config.build_driver_config();
        assert_eq!(driver.max_iterations, 7);
        assert_eq!(driver.thinking_budget, 1024);
        assert_eq!(driver.retry.max_attempts, 5);

        let batch = config.build_batch_config();
        assert_eq!(batch.batch_size, 4);
        assert_eq!(batch.retry.max_attempts, 5);
    }

    #[test]
    fn registry_has_every_tool() {
        let registry = BuilderConfig::default().build_registry(
            Arc::new(ScriptedService::new()),
            ContextSet::new(),
            Arc::new(SharedUsage::new()),
        );
        assert_eq!(
            registry.names(),
            vec![
                "add_to_context",
                "determine_relevance",
                "list_files",
                "read_file",
                "view_context"
            ]
        );
    }
}
