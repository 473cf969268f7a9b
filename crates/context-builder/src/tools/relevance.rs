//! `determine_relevance`: classify many candidate files against a query in
//! parallel and add the relevant ones to the context.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs;
use toolloop::api::ModelService;
use toolloop::api::usage::SharedUsage;
use toolloop::classify::{BatchClassifier, BatchConfig, BatchReport, ClassificationStatus, ModelRelevanceClassifier};
use toolloop::tools::{Tool, ToolFuture, parse_input};
use toolloop::{ClassifyError, ToolDescriptor, ToolError, json_schema_for};
use tracing::{debug, info};

use super::files::{DEFAULT_MAX_ENTRIES, collect_files, normalize_path};
use crate::context::ContextSet;

/// Bytes of each file shown to the classifier.
pub const DEFAULT_EXCERPT_BYTES: usize = 6_000;

/// Typed arguments for `determine_relevance`.
#[derive(Deserialize, JsonSchema)]
pub struct DetermineRelevanceArgs {
    /// What the context is for, e.g. 'how request routing works'.
    pub query: String,
    /// Workdir-relative files to classify. Omit to classify every listed file.
    #[serde(default)]
    pub paths: Option<Vec<String>>,
    /// Restrict the default listing to these extensions (e.g. ["rs"]).
    /// The listing is capped; narrow it if the report says files were skipped.
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
}

/// A file shown to the classifier: its path and a leading excerpt.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub path: String,
    excerpt: String,
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

fn excerpt(content: &str, max: usize) -> String {
    if content.len() <= max {
        return content.to_string();
    }
    let mut end = max;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = content.to_string();
    out.truncate(end);
    out.push_str("\n[...]");
    out
}

fn classification_prompt(query: &str, candidate: &Candidate) -> String {
    format!(
        "Task: {query}\n\nIs the following file relevant to the task?\n\n\
         === {} ===\n{}",
        candidate.path, candidate.excerpt
    )
}

/// Classify candidate files against a query and grow the [`ContextSet`].
pub struct DetermineRelevance {
    workdir: PathBuf,
    service: Arc<dyn ModelService>,
    model: String,
    batch: BatchConfig,
    context: ContextSet,
    usage: Arc<SharedUsage>,
    excerpt_bytes: usize,
    max_candidates: usize,
}

impl DetermineRelevance {
    pub fn new(
        workdir: impl Into<PathBuf>,
        service: Arc<dyn ModelService>,
        model: impl Into<String>,
        context: ContextSet,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            service,
            model: model.into(),
            batch: BatchConfig::default(),
            context,
            usage: Arc::new(SharedUsage::new()),
            excerpt_bytes: DEFAULT_EXCERPT_BYTES,
            max_candidates: DEFAULT_MAX_ENTRIES,
        }
    }

    pub fn batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Accumulate classification tokens into `usage`.
    pub fn usage(mut self, usage: Arc<SharedUsage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn excerpt_bytes(mut self, max: usize) -> Self {
        self.excerpt_bytes = max;
        self
    }

    /// Files taken from the default listing. Listed files past the cap are
    /// reported as skipped, never classified.
    pub fn max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Every listed file under the workdir, split at the candidate cap.
    async fn listed_paths(
        &self,
        extensions: &[String],
    ) -> Result<(Vec<String>, Vec<String>), ToolError> {
        let (mut files, _) = collect_files(&self.workdir, &self.workdir, extensions, usize::MAX)
            .await
            .map_err(|e| ToolError::execution(format!("Error listing files: {e}")))?;
        let overflow = files.split_off(files.len().min(self.max_candidates));
        Ok((files, overflow))
    }

    async fn load_candidates(
        &self,
        paths: Vec<String>,
    ) -> (Vec<Candidate>, Vec<(String, String)>) {
        let mut candidates = Vec::with_capacity(paths.len());
        let mut unreadable = Vec::new();
        let mut seen = HashSet::new();
        for raw in paths {
            let path = match normalize_path(&raw) {
                Ok(path) => path,
                Err(e) => {
                    unreadable.push((raw, e.to_string()));
                    continue;
                }
            };
            if !seen.insert(path.clone()) {
                continue;
            }
            match fs::read_to_string(self.workdir.join(&path)).await {
                Ok(content) => candidates.push(Candidate {
                    excerpt: excerpt(&content, self.excerpt_bytes),
                    path,
                }),
                Err(e) => unreadable.push((path, e.to_string())),
            }
        }
        (candidates, unreadable)
    }
}

fn format_report(
    query: &str,
    report: &BatchReport<Candidate>,
    unreadable: &[(String, String)],
    listing_cap: Option<usize>,
    added: usize,
    usage: &SharedUsage,
) -> String {
    let tokens = usage.snapshot();
    let mut out = format!(
        "Relevance for '{query}': {} relevant, {} failed, {} skipped of {} file(s); \
         {added} added to context.\nClassification tokens: {} input + {} output.",
        report.relevant_count(),
        report.failed_count() + unreadable.len(),
        report.skipped_count(),
        report.len() + unreadable.len(),
        tokens.input_tokens,
        tokens.output_tokens,
    );

    let relevant: Vec<String> = report
        .iter()
        .filter(|c| c.verdict)
        .map(|c| format!("- {}: {}", c.item.path, c.rationale))
        .collect();
    if !relevant.is_empty() {
        out.push_str("\n\nRelevant:\n");
        out.push_str(&relevant.join("\n"));
    }

    let failed: Vec<String> = report
        .iter()
        .filter(|c| c.status != ClassificationStatus::Classified)
        .map(|c| format!("- {}: {}", c.item.path, c.rationale))
        .chain(unreadable.iter().map(|(p, e)| format!("- {p}: unreadable: {e}")))
        .collect();
    if !failed.is_empty() {
        out.push_str("\n\nNot classified (treated as irrelevant):\n");
        out.push_str(&failed.join("\n"));
    }

    if let Some(cap) = listing_cap {
        out.push_str(&format!(
            "\n\n[listing stopped at {cap} candidates; {} file(s) skipped. Narrow the extensions or pass paths]",
            report.skipped_count()
        ));
    }
    out
}

impl Tool for DetermineRelevance {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(
            "determine_relevance",
            "Ask a fast classifier, file by file and in parallel, whether each candidate is \
             relevant to the query. Relevant files are added to the context automatically. \
             Prefer this over reading many files one at a time.",
            json_schema_for::<DetermineRelevanceArgs>(),
        )
    }

    fn execute(&self, input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let args: DetermineRelevanceArgs = parse_input("determine_relevance", input)?;
            let (paths, overflow) = match args.paths {
                Some(paths) => (paths, Vec::new()),
                None => self.listed_paths(&args.extensions.unwrap_or_default()).await?,
            };
            if paths.is_empty() {
                return Ok("No candidate files to classify.".to_string());
            }

            let (mut candidates, unreadable) = self.load_candidates(paths).await;
            debug!(
                "determine_relevance: {} candidate(s), {} unreadable, {} over the listing cap",
                candidates.len(),
                unreadable.len(),
                overflow.len()
            );

            // Overflow goes last and is cut off by `max_items`, so it is
            // reported as skipped without being read.
            let mut batch = self.batch.clone();
            let listing_cap = (!overflow.is_empty()).then_some(self.max_candidates);
            if listing_cap.is_some() {
                let scheduled = batch.max_items.map_or(candidates.len(), |m| m.min(candidates.len()));
                batch = batch.with_max_items(Some(scheduled));
                candidates.extend(overflow.into_iter().map(|path| Candidate {
                    path,
                    excerpt: String::new(),
                }));
            }

            let query = args.query.clone();
            let classifier = ModelRelevanceClassifier::new(
                self.service.clone(),
                self.model.clone(),
                move |candidate: &Candidate| -> Result<String, ClassifyError> {
                    Ok(classification_prompt(&query, candidate))
                },
            )
            .with_usage(self.usage.clone());

            let report = BatchClassifier::new(batch)
                .classify(candidates, &classifier)
                .await;

            let added = self
                .context
                .extend(report.relevant().into_iter().map(|c| c.path.clone()));
            info!(
                "determine_relevance: {} relevant, {added} new in context",
                report.relevant_count()
            );

            Ok(format_report(
                &args.query,
                &report,
                &unreadable,
                listing_cap,
                added,
                &self.usage,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use toolloop::ModelResponse;
    use toolloop::api::mock::ScriptedService;
    use toolloop::api::retry::RetryConfig;

    /// Says YES to any file whose excerpt mentions `route`.
    fn router_classifier() -> Arc<ScriptedService> {
        Arc::new(ScriptedService::responder(|request| {
            let prompt = request.messages.last().and_then(|m| m.text()).unwrap_or_default();
            let answer = if prompt.contains("route") { "YES: defines routes" } else { "NO: unrelated" };
            Ok(ModelResponse::text(answer).with_usage(50, 5))
        }))
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/router.rs"), "fn route() {}").unwrap();
        std::fs::write(dir.path().join("src/db.rs"), "fn connect() {}").unwrap();
        std::fs::write(dir.path().join("notes.md"), "route table notes").unwrap();
        dir
    }

    fn tool(dir: &tempfile::TempDir, service: Arc<ScriptedService>, context: ContextSet) -> DetermineRelevance {
        DetermineRelevance::new(dir.path(), service as Arc<dyn ModelService>, "m", context)
            .batch_config(BatchConfig::default().with_batch_size(2).with_retry(RetryConfig::fixed(2, Duration::ZERO)))
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "h\n[...]");
        assert_eq!(excerpt("short", 10), "short");
    }

    #[tokio::test]
    async fn adds_relevant_files_to_context() {
        let dir = workspace();
        let context = ContextSet::new();
        let service = router_classifier();
        let out = tool(&dir, service.clone(), context.clone())
            .execute(json!({"query": "routing", "paths": ["src/router.rs", "src/db.rs", "notes.md"]}))
            .await
            .unwrap();

        assert_eq!(context.paths(), vec!["src/router.rs", "notes.md"]);
        assert!(out.contains("2 relevant, 0 failed, 0 skipped of 3 file(s); 2 added"));
        assert!(out.contains("Classification tokens: 150 input + 15 output."));
        assert!(out.contains("- src/router.rs: defines routes"));
        assert_eq!(service.calls(), 3);
    }

    #[tokio::test]
    async fn defaults_to_listing_with_extension_filter() {
        let dir = workspace();
        let context = ContextSet::new();
        tool(&dir, router_classifier(), context.clone())
            .execute(json!({"query": "routing", "extensions": ["rs"]}))
            .await
            .unwrap();
        assert_eq!(context.paths(), vec!["src/router.rs"]);
    }

    #[tokio::test]
    async fn unreadable_and_failed_files_are_reported_not_added() {
        let dir = workspace();
        let context = ContextSet::new();
        let failing = Arc::new(ScriptedService::responder(|_| {
            Err(toolloop::ServiceError::transient("HTTP 503"))
        }));
        let out = tool(&dir, failing.clone(), context.clone())
            .execute(json!({"query": "q", "paths": ["src/db.rs", "missing.rs", "../secret"]}))
            .await
            .unwrap();

        assert!(context.is_empty());
        assert!(out.contains("0 relevant, 3 failed"));
        assert!(out.contains("- src/db.rs: classification failed after 2 attempt(s)"));
        assert!(out.contains("- missing.rs: unreadable"));
        assert!(out.contains("path traversal not allowed"));
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn one_file_under_several_spellings_is_classified_once() {
        let dir = workspace();
        let context = ContextSet::new();
        let service = router_classifier();
        let out = tool(&dir, service.clone(), context.clone())
            .execute(json!({
                "query": "routing",
                "paths": ["src/router.rs", "./src/router.rs", "src/./router.rs"]
            }))
            .await
            .unwrap();

        assert_eq!(service.calls(), 1);
        assert_eq!(context.paths(), vec!["src/router.rs"]);
        assert!(out.contains("1 relevant, 0 failed, 0 skipped of 1 file(s); 1 added"));
    }

    #[tokio::test]
    async fn listing_past_the_cap_is_reported_as_skipped() {
        let dir = workspace();
        let context = ContextSet::new();
        let service = router_classifier();
        let out = tool(&dir, service.clone(), context.clone())
            .max_candidates(2)
            .execute(json!({"query": "routing"}))
            .await
            .unwrap();

        // Sorted listing: notes.md, src/db.rs | src/router.rs.
        assert_eq!(service.calls(), 2);
        assert_eq!(context.paths(), vec!["notes.md"]);
        assert!(out.contains("1 relevant, 0 failed, 1 skipped of 3 file(s)"));
        assert!(out.contains("- src/router.rs: skipped: exceeds max_items limit of 2"));
        assert!(out.contains("[listing stopped at 2 candidates; 1 file(s) skipped."));
    }
}
