//! A [`Classifier`] backed by a one-shot model call per item.
//!
//! Each item is rendered into a user prompt, sent with a fixed system
//! instruction and no tools, and the reply is parsed as a YES/NO answer
//! followed by a short rationale. Token usage from every call is added to a
//! shared counter so the caller can report what the classification pass
//! cost.

use std::sync::Arc;

use tracing::trace;

use super::batch::{ClassifyFuture, Classifier, Verdict};
use crate::api::service::ModelService;
use crate::api::usage::SharedUsage;
use crate::error::ClassifyError;
use crate::{CLASSIFICATION_MAX_TOKENS, Message, ModelRequest};

/// System instruction for relevance classification.
const CLASSIFICATION_PROMPT: &str = "\
You decide whether a single candidate is relevant to a task.

Answer on one line. Start with exactly YES or NO, then a colon, then one short \
sentence explaining why. Do not add anything else.

Examples:
YES: defines the request parser the task asks about.
NO: unrelated build script.";

type PromptFn<T> = Box<dyn Fn(&T) -> Result<String, ClassifyError> + Send + Sync>;

/// Classifies items by asking a model a YES/NO question about each one.
pub struct ModelRelevanceClassifier<T> {
    service: Arc<dyn ModelService>,
    model: String,
    max_tokens: u32,
    usage: Arc<SharedUsage>,
    prompt: PromptFn<T>,
}

impl<T> ModelRelevanceClassifier<T> {
    /// `prompt` renders one item into the user message. Returning an error
    /// fails that item's classification.
    pub fn new<F>(service: Arc<dyn ModelService>, model: impl Into<String>, prompt: F) -> Self
    where
        F: Fn(&T) -> Result<String, ClassifyError> + Send + Sync + 'static,
    {
        Self {
            service,
            model: model.into(),
            max_tokens: CLASSIFICATION_MAX_TOKENS,
            usage: Arc::new(SharedUsage::new()),
            prompt: Box::new(prompt),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Share a usage counter with other work, e.g. the calling tool.
    pub fn with_usage(mut self, usage: Arc<SharedUsage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &Arc<SharedUsage> {
        &self.usage
    }

    fn build_request(&self, prompt: String) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            messages: vec![Message::system(CLASSIFICATION_PROMPT), Message::user(prompt)],
            tools: Vec::new(),
            thinking_budget: 0,
            max_output_tokens: self.max_tokens,
            temperature: 0.0,
        }
    }
}

impl<T: Sync> Classifier<T> for ModelRelevanceClassifier<T> {
    fn classify<'a>(&'a self, item: &'a T) -> ClassifyFuture<'a> {
        Box::pin(async move {
            let request = self.build_request((self.prompt)(item)?);
            let response = self.service.complete(&request).await?;
            self.usage.record(response.usage);

            let text = response.final_text().unwrap_or_default();
            trace!("Classification answer: {text}");
            if text.trim().is_empty() {
                return Err(ClassifyError::transient("empty classification answer"));
            }
            parse_verdict(&text)
        })
    }
}

/// Parse `YES: reason` / `NO - reason` style answers.
///
/// The first word decides the verdict, case-insensitively. Anything that
/// does not start with a recognized word is a permanent failure, since
/// asking again with the same prompt rarely fixes it.
pub fn parse_verdict(text: &str) -> Result<Verdict, ClassifyError> {
    let trimmed = text.trim().trim_start_matches(['*', '"', '`']);
    let (head, rest) = trimmed
        .split_once(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or((trimmed, ""));

    let verdict = match head.to_ascii_uppercase().as_str() {
        "YES" | "RELEVANT" | "TRUE" => true,
        "NO" | "IRRELEVANT" | "FALSE" => false,
        _ => {
            return Err(ClassifyError::permanent(format!(
                "unrecognized classification answer: {}",
                first_line(trimmed)
            )));
        }
    };

    let rationale = rest
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | ',' | '.' | '*'))
        .trim();
    let rationale = if rationale.is_empty() {
        format!("model answered {}", if verdict { "yes" } else { "no" })
    } else {
        first_line(rationale).to_string()
    };

    Ok(Verdict { verdict, rationale })
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelResponse;
    use crate::api::mock::ScriptedService;
    use crate::error::ServiceError;

    fn classifier(service: ScriptedService) -> (Arc<ScriptedService>, ModelRelevanceClassifier<String>) {
        let service = Arc::new(service);
        let classifier = ModelRelevanceClassifier::new(
            service.clone() as Arc<dyn ModelService>,
            "test-model",
            |item: &String| Ok(format!("Task: fix the parser\nCandidate: {item}")),
        );
        (service, classifier)
    }

    #[test]
    fn parses_yes_and_no() {
        let yes = parse_verdict("YES: defines the parser").unwrap();
        assert!(yes.verdict);
        assert_eq!(yes.rationale, "defines the parser");

        let no = parse_verdict("  no - unrelated\nextra line").unwrap();
        assert!(!no.verdict);
        assert_eq!(no.rationale, "unrelated");
    }

    #[test]
    fn bare_answer_gets_default_rationale() {
        let v = parse_verdict("Yes").unwrap();
        assert!(v.verdict);
        assert_eq!(v.rationale, "model answered yes");
    }

    #[test]
    fn markdown_emphasis_is_tolerated() {
        assert!(parse_verdict("**YES**: it is").unwrap().verdict);
    }

    #[test]
    fn unrecognized_answer_is_permanent() {
        let err = parse_verdict("Maybe, hard to say").unwrap_err();
        assert!(!err.transient);
        assert!(err.message.contains("Maybe"));
    }

    #[tokio::test]
    async fn sends_one_shot_request_and_records_usage() {
        let (service, classifier) = classifier(
            ScriptedService::new()
                .then_respond(ModelResponse::text("YES: mentions parse()").with_usage(40, 6)),
        );

        let verdict = classifier.classify(&"src/parse.rs".to_string()).await.unwrap();
        assert!(verdict.verdict);
        assert_eq!(verdict.rationale, "mentions parse()");

        let request = service.last_request().unwrap();
        assert_eq!(request.model, "test-model");
        assert!(request.tools.is_empty());
        assert_eq!(request.max_output_tokens, CLASSIFICATION_MAX_TOKENS);
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[1].text().unwrap().contains("src/parse.rs"));

        let usage = classifier.usage().snapshot();
        assert_eq!(usage.input_tokens, 40);
        assert_eq!(usage.output_tokens, 6);
        assert_eq!(usage.calls, 1);
    }

    #[tokio::test]
    async fn service_errors_keep_their_transience() {
        let (_, classifier) = classifier(
            ScriptedService::new()
                .then_fail(ServiceError::transient("HTTP 429"))
                .then_fail(ServiceError::fatal("HTTP 401")),
        );
        let item = "a".to_string();
        assert!(classifier.classify(&item).await.unwrap_err().transient);
        assert!(!classifier.classify(&item).await.unwrap_err().transient);
    }

    #[tokio::test]
    async fn empty_answer_is_transient() {
        let (_, classifier) = classifier(ScriptedService::new().then_respond(ModelResponse::default()));
        let err = classifier.classify(&"a".to_string()).await.unwrap_err();
        assert!(err.transient);
        assert_eq!(classifier.usage().snapshot().calls_without_usage, 1);
    }

    #[tokio::test]
    async fn prompt_errors_fail_the_item() {
        let classifier = ModelRelevanceClassifier::new(
            Arc::new(ScriptedService::new()) as Arc<dyn ModelService>,
            "m",
            |_: &String| Err(ClassifyError::permanent("unreadable")),
        );
        let err = classifier.classify(&"a".to_string()).await.unwrap_err();
        assert_eq!(err.message, "unreadable");
    }
}
