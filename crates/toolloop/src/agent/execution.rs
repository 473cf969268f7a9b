//! Per-iteration mechanics: sending the model request under retry and
//! executing one turn's tool requests.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::events::{DriverEvent, EventHandler};
use crate::api::retry::{RetryOutcome, RetryingInvoker};
use crate::api::service::ModelService;
use crate::error::DriverError;
use crate::tools::ToolRegistry;
use crate::{ModelRequest, ModelResponse, ToolInvocation, ToolInvocationOutcome};

// ── Send request ──────────────────────────────────────────────────

/// Call the model, retrying transient failures. A failure that survives the
/// retry budget, or any fatal failure, ends the run.
pub(crate) async fn send_iteration_request(
    service: &dyn ModelService,
    invoker: &RetryingInvoker,
    request: &ModelRequest,
) -> Result<ModelResponse, DriverError> {
    debug!(
        "Sending {} message(s), {} tool(s) to {}",
        request.messages.len(),
        request.tools.len(),
        request.model
    );

    let RetryOutcome { result, attempts } =
        invoker.invoke_counted(|| service.complete(request)).await;

    result.map_err(|source| DriverError::Service { attempts, source })
}

// ── Tool execution ────────────────────────────────────────────────

/// Execute a model turn's tool requests sequentially in received order.
///
/// Returns exactly one outcome per distinct request id, in request order.
/// Repeated ids after the first are dropped. Tool failures of any kind
/// become error-flagged outcomes.
pub(crate) async fn execute_tool_requests(
    tools: &ToolRegistry,
    event_handler: &dyn EventHandler,
    requests: &[ToolInvocation],
) -> Vec<ToolInvocationOutcome> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(requests.len());
    let mut results = Vec::with_capacity(requests.len());

    for request in requests {
        if !seen.insert(request.id.as_str()) {
            warn!(
                "Duplicate tool request id '{}' ({}) in one turn; dropping",
                request.id, request.tool_name
            );
            event_handler.on_event(&DriverEvent::DuplicateRequestDropped {
                id: &request.id,
                name: &request.tool_name,
            });
            continue;
        }

        event_handler.on_event(&DriverEvent::ToolExecuting {
            name: &request.tool_name,
            id: &request.id,
            input: &request.input,
        });

        let outcome = match tools
            .dispatch(&request.tool_name, request.input.clone())
            .await
        {
            Ok(output) => ToolInvocationOutcome::success(&request.id, output),
            Err(e) => ToolInvocationOutcome::error(&request.id, e.to_string()),
        };

        event_handler.on_event(&DriverEvent::ToolResult {
            name: &request.tool_name,
            id: &request.id,
            result: &outcome.content,
            is_error: outcome.is_error,
        });
        results.push(outcome);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::NoopHandler;
    use crate::api::mock::ScriptedService;
    use crate::api::retry::RetryConfig;
    use crate::error::ServiceError;
    use serde_json::json;
    use std::time::Duration;

    fn request(id: &str, name: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.into(),
            tool_name: name.into(),
            input: json!({"text": id}),
        }
    }

    fn echo_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register_fn("echo", "Echo", json!({"type": "object"}), |input| async move {
            Ok(input["text"].as_str().unwrap_or_default().to_string())
        });
        tools
    }

    #[tokio::test]
    async fn results_match_requests_one_to_one() {
        let requests = vec![request("a", "echo"), request("b", "missing"), request("c", "echo")];
        let results = execute_tool_requests(&echo_registry(), &NoopHandler, &requests).await;

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!results[0].is_error);
        assert_eq!(results[0].content, "a");
        assert!(results[1].is_error);
        assert!(results[1].content.contains("unknown tool 'missing'"));
    }

    #[tokio::test]
    async fn duplicate_ids_dispatch_once() {
        let requests = vec![request("a", "echo"), request("a", "echo"), request("b", "echo")];
        let results = execute_tool_requests(&echo_registry(), &NoopHandler, &requests).await;
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn send_reports_attempts_on_failure() {
        let service = ScriptedService::responder(|_| Err(ServiceError::transient("HTTP 503")));
        let invoker = RetryingInvoker::new(RetryConfig::fixed(3, Duration::from_secs(1)));

        let err = send_iteration_request(&service, &invoker, &ModelRequest::default())
            .await
            .unwrap_err();
        let DriverError::Service { attempts, .. } = err;
        assert_eq!(attempts, 3);
        assert_eq!(service.calls(), 3);
    }
}
