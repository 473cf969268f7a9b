//! The conversation loop.
//!
//! [`ConversationDriver`] owns the history for one run. Each iteration sends
//! the full history and the tool list to the model, then branches on what
//! came back:
//!
//! - text and no tool requests: append the turn and finish;
//! - tool requests: append the turn verbatim, run each request in order,
//!   append one caller turn holding every result, and go again;
//! - nothing usable: report it and spend the iteration.
//!
//! The loop always stops once `max_iterations` model calls have been made.

use tracing::{debug, info, warn};

use super::config::DriverConfig;
use super::events::{
    DID_NOT_COMPLETE_TEXT, DriverEvent, EventHandler, NoopHandler, RunResult, TerminationReason,
};
use super::execution::{execute_tool_requests, send_iteration_request};
use crate::api::retry::RetryingInvoker;
use crate::api::service::ModelService;
use crate::api::usage::{UsageAccountant, generate_span_id, generate_trace_id};
use crate::error::DriverError;
use crate::tools::ToolRegistry;
use crate::{ContentBlock, Message, ModelRequest, ToolInvocation};

/// Mutable bookkeeping for one run. Changed only by the driver, once per
/// iteration.
#[derive(Debug)]
pub struct LoopState {
    /// Model calls made so far.
    pub iteration: u32,
    pub max_iterations: u32,
    pub usage: UsageAccountant,
    pub terminated: bool,
    pub termination_reason: Option<TerminationReason>,
}

impl LoopState {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 0,
            max_iterations,
            usage: UsageAccountant::new(),
            terminated: false,
            termination_reason: None,
        }
    }

    pub fn budget_exhausted(&self) -> bool {
        self.iteration >= self.max_iterations
    }

    /// Start the next iteration and return its 1-based number.
    fn advance(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    fn terminate(&mut self, reason: TerminationReason) {
        self.terminated = true;
        self.termination_reason = Some(reason);
    }
}

/// Runs one tool-use conversation to completion or budget exhaustion.
///
/// The event handler is borrowed for the driver's lifetime, so bind it to a
/// variable before building the driver:
///
/// ```ignore
/// let handler = CompositeEventHandler::new().with(LoggingHandler);
/// let result = ConversationDriver::new(&client, &tools, config)
///     .with_event_handler(&handler)
///     .run(messages)
///     .await?;
/// ```
pub struct ConversationDriver<'a> {
    service: &'a dyn ModelService,
    tools: &'a ToolRegistry,
    config: DriverConfig,
    event_handler: &'a dyn EventHandler,
}

impl<'a> ConversationDriver<'a> {
    pub fn new(service: &'a dyn ModelService, tools: &'a ToolRegistry, config: DriverConfig) -> Self {
        Self {
            service,
            tools,
            config,
            event_handler: &NoopHandler,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Run the loop from `initial_messages`.
    ///
    /// Returns `Ok` for both a final answer and an exhausted budget; check
    /// [`RunResult::termination`]. Only a model-service failure that
    /// survives retry is an `Err`.
    pub async fn run(self, initial_messages: Vec<Message>) -> Result<RunResult, DriverError> {
        let trace_id = generate_trace_id();
        let invoker = RetryingInvoker::new(self.config.retry.clone()).with_label("model call");
        let descriptors = self.tools.descriptors();
        let mut state = LoopState::new(self.config.max_iterations);
        let mut history = initial_messages;
        let mut final_text = None;

        info!(
            "Run started: trace_id={trace_id}, model={}, tools={}, max_iterations={}",
            self.config.model,
            descriptors.len(),
            self.config.max_iterations
        );
        self.event_handler.on_event(&DriverEvent::RunStarted {
            trace_id: &trace_id,
            max_iterations: state.max_iterations,
        });

        while !state.budget_exhausted() {
            let iteration = state.advance();
            debug!("span {}", generate_span_id(&trace_id, iteration));
            self.event_handler.on_event(&DriverEvent::IterationStart {
                iteration,
                max_iterations: state.max_iterations,
            });

            let request = ModelRequest {
                model: self.config.model.clone(),
                messages: history.clone(),
                tools: descriptors.clone(),
                thinking_budget: self.config.thinking_budget,
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            };
            let response = send_iteration_request(self.service, &invoker, &request).await?;

            state.usage.record(response.usage);
            match response.usage {
                Some(u) => self.event_handler.on_event(&DriverEvent::TokenUsage {
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                }),
                None => {
                    warn!("Model response at iteration {iteration} carried no usage");
                    self.event_handler
                        .on_event(&DriverEvent::UsageMissing { iteration });
                }
            }

            for block in &response.content {
                match block {
                    ContentBlock::Reasoning { text } if !text.is_empty() => {
                        self.event_handler.on_event(&DriverEvent::Reasoning(text));
                    }
                    ContentBlock::Text { text } => {
                        self.event_handler.on_event(&DriverEvent::Text(text));
                    }
                    _ => {}
                }
            }

            let requests: Vec<ToolInvocation> =
                response.tool_requests().into_iter().cloned().collect();

            if requests.is_empty() {
                match response.final_text() {
                    Some(text) => {
                        history.push(Message::assistant(response.content));
                        final_text = Some(text);
                        state.terminate(TerminationReason::Completed);
                        self.event_handler
                            .on_event(&DriverEvent::Finished { iterations: iteration });
                        break;
                    }
                    None => {
                        self.event_handler
                            .on_event(&DriverEvent::EmptyResponse { iteration });
                        continue;
                    }
                }
            }

            self.event_handler.on_event(&DriverEvent::ToolCallsReceived {
                iteration,
                count: requests.len(),
            });
            history.push(Message::assistant(response.content));

            let results = execute_tool_requests(self.tools, self.event_handler, &requests).await;
            history.push(Message::tool_results(results));
        }

        if !state.terminated {
            state.terminate(TerminationReason::MaxIterations);
            self.event_handler
                .on_event(&DriverEvent::IterationLimitReached {
                    max_iterations: state.max_iterations,
                });
        }

        let usage = state.usage.snapshot();
        let termination = state
            .termination_reason
            .unwrap_or(TerminationReason::MaxIterations);
        info!(
            "Run finished: trace_id={trace_id}, reason={termination}, iterations={}, {}",
            state.iteration,
            usage.summary()
        );

        Ok(RunResult {
            trace_id,
            final_text: final_text.unwrap_or_else(|| DID_NOT_COMPLETE_TEXT.to_string()),
            usage,
            termination,
            iterations: state.iteration,
            history,
        })
    }
}
