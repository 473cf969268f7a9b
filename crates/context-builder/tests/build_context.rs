//! End-to-end context building against a scripted model service on a
//! temporary codebase.

use std::sync::Arc;

use context_builder::{BuilderConfig, build_context};
use serde_json::json;
use toolloop::agent::{NoopHandler, TerminationReason};
use toolloop::api::ModelService;
use toolloop::api::mock::ScriptedService;
use toolloop::{ContentBlock, ModelRequest, ModelResponse};

fn codebase() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("src/auth")).unwrap();
    std::fs::create_dir_all(root.join("node_modules/lib")).unwrap();
    std::fs::write(root.join("src/auth/session.rs"), "pub fn check_token() {}").unwrap();
    std::fs::write(root.join("src/auth/mod.rs"), "mod session; // token checks").unwrap();
    std::fs::write(root.join("src/main.rs"), "fn main() { serve(); }").unwrap();
    std::fs::write(root.join("README.md"), "token based auth").unwrap();
    std::fs::write(root.join("node_modules/lib/token.rs"), "token").unwrap();
    dir
}

/// Classifier sub-queries carry no tools; the driver's requests do.
fn answer(request: &ModelRequest) -> ModelResponse {
    let last = request.messages.last();
    if request.tools.is_empty() {
        let prompt = last.and_then(|m| m.text()).unwrap_or_default();
        let verdict = if prompt.contains("token") { "YES: token handling" } else { "NO: unrelated" };
        return ModelResponse::text(verdict).with_usage(30, 3);
    }

    let after_tools = last.is_some_and(|m| m.tool_results_iter().next().is_some());
    if after_tools {
        ModelResponse::text("Selected the auth module.").with_usage(400, 20)
    } else {
        ModelResponse::default()
            .with_block(ContentBlock::tool_request(
                "r1",
                "determine_relevance",
                json!({"query": "how is auth enforced", "extensions": ["rs"]}),
            ))
            .with_usage(300, 25)
    }
}

#[tokio::test]
async fn selects_relevant_files_and_finishes() {
    let dir = codebase();
    let service = Arc::new(ScriptedService::responder(|request| Ok(answer(request))));
    let config = BuilderConfig {
        workdir: dir.path().to_path_buf(),
        batch_size: 2,
        ..Default::default()
    };

    let outcome = build_context(
        &config,
        service.clone() as Arc<dyn ModelService>,
        "How is auth enforced?",
        &NoopHandler,
    )
    .await
    .unwrap();

    assert_eq!(outcome.run.termination, TerminationReason::Completed);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.context, vec!["src/auth/mod.rs", "src/auth/session.rs"]);

    // Two driver calls plus one sub-query per .rs file outside node_modules.
    assert_eq!(service.calls(), 5);
    assert_eq!(outcome.run.usage.input_tokens, 700);
    assert_eq!(outcome.classifier_usage.calls, 3);
    assert_eq!(outcome.classifier_usage.input_tokens, 90);

    let rendered = outcome.render();
    assert!(rendered.starts_with("Selected the auth module."));
    assert!(rendered.contains("Context files (2):\n  src/auth/mod.rs\n  src/auth/session.rs"));
}

#[tokio::test]
async fn exhausted_budget_exits_with_two() {
    let dir = codebase();
    let service = Arc::new(ScriptedService::responder(|_| {
        Ok(ModelResponse::default().with_block(ContentBlock::tool_request(
            "v",
            "view_context",
            json!({}),
        )))
    }));
    let config = BuilderConfig {
        workdir: dir.path().to_path_buf(),
        max_rounds: 2,
        ..Default::default()
    };

    let outcome = build_context(&config, service.clone() as Arc<dyn ModelService>, "q", &NoopHandler)
        .await
        .unwrap();

    assert_eq!(outcome.exit_code(), 2);
    assert_eq!(service.calls(), 2);
    assert!(outcome.render().starts_with("reached the loop budget without finishing"));
    assert!(outcome.context.is_empty());
}

#[tokio::test]
async fn fatal_service_error_is_an_error() {
    let dir = codebase();
    let service = Arc::new(ScriptedService::responder(|_| {
        Err(toolloop::ServiceError::fatal("HTTP 401: bad key"))
    }));
    let config = BuilderConfig {
        workdir: dir.path().to_path_buf(),
        ..Default::default()
    };

    let err = build_context(&config, service.clone() as Arc<dyn ModelService>, "q", &NoopHandler)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("bad key"));
    assert_eq!(service.calls(), 1);
}
