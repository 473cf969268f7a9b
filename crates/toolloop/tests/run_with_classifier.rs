//! End-to-end runs of the driver against a scripted model service, with a
//! tool that fans out to the batch classifier.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use toolloop::api::mock::ScriptedService;
use toolloop::prelude::*;

/// Answers YES for candidates whose name mentions "parse".
fn classifier_service() -> Arc<ScriptedService> {
    Arc::new(ScriptedService::responder(|request| {
        let prompt = request
            .messages
            .last()
            .and_then(|m| m.text())
            .unwrap_or_default();
        let answer = if prompt.contains("parse") {
            "YES: handles parsing"
        } else {
            "NO: unrelated"
        };
        Ok(ModelResponse::text(answer).with_usage(20, 4))
    }))
}

fn classify_tool(service: Arc<ScriptedService>, usage: Arc<SharedUsage>) -> FnTool {
    FnTool::raw(
        ToolDescriptor::new(
            "classify",
            "Return the candidates relevant to the parser",
            json!({
                "type": "object",
                "properties": {"candidates": {"type": "array", "items": {"type": "string"}}},
                "required": ["candidates"]
            }),
        ),
        move |input: Value| {
            let service = service.clone();
            let usage = usage.clone();
            async move {
                let candidates: Vec<String> = input["candidates"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let classifier = ModelRelevanceClassifier::new(
                    service as Arc<dyn ModelService>,
                    "classifier-model",
                    |item: &String| Ok(format!("Is {item} relevant?")),
                )
                .with_usage(usage);
                let report = BatchClassifier::new(BatchConfig::default().with_batch_size(2))
                    .classify(candidates, &classifier)
                    .await;
                let relevant: Vec<&str> = report.relevant().into_iter().map(String::as_str).collect();
                Ok(relevant.join(","))
            }
        },
    )
}

#[tokio::test]
async fn tool_round_feeds_classifier_results_back_to_the_model() {
    let classifier = classifier_service();
    let usage = Arc::new(SharedUsage::new());
    let tools = ToolRegistry::new().with(classify_tool(classifier.clone(), usage.clone()));

    let driver_service = ScriptedService::new()
        .then_respond(
            ModelResponse::default()
                .with_block(ContentBlock::text("Let me check the candidates."))
                .with_block(ContentBlock::tool_request(
                    "call-1",
                    "classify",
                    json!({"candidates": ["lexer.rs", "parser.rs", "build.rs", "parse_util.rs", "parser.rs"]}),
                ))
                .with_usage(100, 30),
        )
        .then_respond(ModelResponse::text("parser.rs and parse_util.rs").with_usage(150, 10));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handler = FnEventHandler::new(move |event| {
        if let DriverEvent::ToolResult { result, is_error, .. } = event {
            sink.lock().unwrap().push((result.to_string(), *is_error));
        }
    });

    let result = ConversationDriver::new(&driver_service, &tools, DriverConfig::new("driver-model"))
        .with_event_handler(&handler)
        .run(vec![Message::system("sys"), Message::user("Which files parse input?")])
        .await
        .unwrap();

    assert!(result.completed());
    assert_eq!(result.final_text, "parser.rs and parse_util.rs");
    assert_eq!(result.iterations, 2);
    assert_eq!(result.usage.input_tokens, 250);
    assert_eq!(result.usage.output_tokens, 40);

    // system, user, assistant(tool request), user(results), assistant(final)
    assert_eq!(result.history.len(), 5);
    let outcomes: Vec<&ToolInvocationOutcome> = result.history[3].tool_results_iter().collect();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].id, "call-1");
    assert_eq!(outcomes[0].content, "parser.rs,parse_util.rs");

    assert_eq!(
        *events.lock().unwrap(),
        vec![("parser.rs,parse_util.rs".to_string(), false)]
    );

    // Four distinct candidates, one classification call each.
    assert_eq!(classifier.calls(), 4);
    let classified = usage.snapshot();
    assert_eq!(classified.calls, 4);
    assert_eq!(classified.input_tokens, 80);
}

#[tokio::test(start_paused = true)]
async fn classifier_outage_fails_closed_without_ending_the_run() {
    let outage = Arc::new(ScriptedService::responder(|_| {
        Err(ServiceError::transient("HTTP 503"))
    }));
    let usage = Arc::new(SharedUsage::new());
    let tools = ToolRegistry::new().with(classify_tool(outage.clone(), usage));

    let driver_service = ScriptedService::new()
        .then_respond(ModelResponse::default().with_block(ContentBlock::tool_request(
            "c1",
            "classify",
            json!({"candidates": ["a.rs", "b.rs", "c.rs"]}),
        )))
        .then_respond(ModelResponse::text("nothing relevant"));

    let result = ConversationDriver::new(&driver_service, &tools, DriverConfig::new("m"))
        .run(vec![Message::user("go")])
        .await
        .unwrap();

    assert!(result.completed());
    let outcome = result.history[2].tool_results_iter().next().unwrap();
    assert!(!outcome.is_error);
    assert_eq!(outcome.content, "");
    // Default classification policy: three attempts per item.
    assert_eq!(outage.calls(), 9);
}

#[tokio::test(start_paused = true)]
async fn driver_outage_surfaces_attempt_count() {
    let service = ScriptedService::responder(|_| Err(ServiceError::transient("connection reset")));
    let tools = ToolRegistry::new();
    let config = DriverConfig::new("m")
        .with_retries(3)
        .with_fixed_backoff(Duration::from_secs(1));

    let err = ConversationDriver::new(&service, &tools, config)
        .run(vec![Message::user("hello")])
        .await
        .unwrap_err();

    assert!(err.to_string().contains("after 3 attempt(s)"));
    assert_eq!(service.calls(), 3);
}

#[tokio::test]
async fn endless_tool_requests_stop_at_the_budget() {
    let service = ScriptedService::responder(|_| {
        Ok(ModelResponse::default().with_block(ContentBlock::tool_request(
            "again",
            "noop",
            json!({}),
        )))
    });
    let mut tools = ToolRegistry::new();
    tools.register_fn("noop", "Does nothing", json!({"type": "object"}), |_| async {
        Ok("ok".to_string())
    });

    let result = ConversationDriver::new(&service, &tools, DriverConfig::new("m").with_max_iterations(3))
        .run(vec![Message::user("loop forever")])
        .await
        .unwrap();

    assert_eq!(result.termination, TerminationReason::MaxIterations);
    assert_eq!(result.final_text, toolloop::agent::DID_NOT_COMPLETE_TEXT);
    assert_eq!(service.calls(), 3);
    assert_eq!(result.usage.calls_without_usage, 3);
}
