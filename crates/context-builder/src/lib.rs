//! Select the files of a codebase that matter for a question.
//!
//! `context-builder` drives a toolloop conversation whose tools list and
//! read files, screen candidates in parallel with the batch classifier,
//! and collect the chosen paths in a [`ContextSet`].
//!
//! # Library usage
//!
//! ```ignore
//! use context_builder::{BuilderConfig, build_context};
//!
//! let config = BuilderConfig { workdir: "/my/project".into(), ..Default::default() };
//! let outcome = build_context(&config, service, "How are requests routed?", &LoggingHandler).await?;
//! for path in &outcome.context {
//!     println!("{path}");
//! }
//! ```
//!
//! # Binary
//!
//! ```sh
//! context-builder --workdir /my/project --prompt "How are requests routed?"
//! ```

pub mod config;
pub mod context;
pub mod prompt;
pub mod tools;

use std::process::ExitCode;
use std::sync::Arc;

use toolloop::agent::{ConversationDriver, EventHandler, RunResult, TerminationReason};
use toolloop::api::ModelService;
use toolloop::api::usage::{SharedUsage, UsageSnapshot};
use toolloop::{DriverError, Message};

pub use config::BuilderConfig;
pub use context::ContextSet;
pub use prompt::{context_builder_prompt, task_message};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct ContextOutcome {
    pub run: RunResult,
    /// Selected files in the order they were added.
    pub context: Vec<String>,
    /// Tokens spent on relevance sub-queries, separate from the driver's.
    pub classifier_usage: UsageSnapshot,
}

impl ContextOutcome {
    /// `0` when the model finished, `2` when the loop budget ran out.
    pub fn exit_code(&self) -> u8 {
        match self.run.termination {
            TerminationReason::Completed => 0,
            TerminationReason::MaxIterations => 2,
        }
    }

    /// Human-readable report printed by the binary.
    pub fn render(&self) -> String {
        let mut out = match self.run.termination {
            TerminationReason::Completed => self.run.final_text.clone(),
            TerminationReason::MaxIterations => {
                "reached the loop budget without finishing".to_string()
            }
        };
        out.push_str(&format!("\n\nContext files ({}):", self.context.len()));
        for path in &self.context {
            out.push_str(&format!("\n  {path}"));
        }
        out.push_str(&format!(
            "\n\nDriver {}\nClassifier {}",
            self.run.usage.summary(),
            self.classifier_usage.summary()
        ));
        out
    }
}

impl From<&ContextOutcome> for ExitCode {
    fn from(outcome: &ContextOutcome) -> Self {
        ExitCode::from(outcome.exit_code())
    }
}

/// Run the context-building conversation for `question`.
pub async fn build_context(
    config: &BuilderConfig,
    service: Arc<dyn ModelService>,
    question: &str,
    handler: &dyn EventHandler,
) -> Result<ContextOutcome, DriverError> {
    let context = ContextSet::new();
    let classifier_usage = Arc::new(SharedUsage::new());
    let tools = config.build_registry(service.clone(), context.clone(), classifier_usage.clone());

    let messages = vec![
        Message::system(context_builder_prompt()),
        Message::user(task_message(question)),
    ];

    let run = ConversationDriver::new(&*service, &tools, config.build_driver_config())
        .with_event_handler(handler)
        .run(messages)
        .await?;

    Ok(ContextOutcome {
        run,
        context: context.paths(),
        classifier_usage: classifier_usage.snapshot(),
    })
}
