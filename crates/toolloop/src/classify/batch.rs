//! Bounded parallel classification with fail-closed results.
//!
//! [`BatchClassifier`] splits a candidate list into consecutive chunks of
//! `batch_size`. Chunks run one after another; the items inside a chunk run
//! concurrently, so at most `batch_size` classifications are ever in
//! flight. Each item goes through a [`RetryingInvoker`]. An item whose
//! classification errors out, exhausts its retries, or panics still gets a
//! [`Classification`], with `verdict: false` and the failure in the
//! rationale. Results are merged by the caller's task after each chunk
//! barrier, so nothing is shared between workers.
//!
//! A chunk's futures are polled together on the calling task with
//! `join_all`, not spawned. Concurrency comes from the classifiers
//! awaiting I/O (model calls); a classifier that blocks or burns CPU inside
//! `classify` runs its chunk one item at a time and should move that work
//! onto `tokio::task::spawn_blocking` itself.
//!
//! # Example
//!
//! ```ignore
//! let classifier = FnClassifier::new(|path: String| async move {
//!     Ok(Verdict::yes(format!("{path} mentions the parser")))
//! });
//!
//! let report = BatchClassifier::new(BatchConfig::default().with_batch_size(8))
//!     .classify(paths, &classifier)
//!     .await;
//!
//! for path in report.relevant() {
//!     println!("{path}");
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::api::retry::{RetryConfig, RetryOutcome, RetryingInvoker};
use crate::error::ClassifyError;
use crate::tools::registry::panic_message;

/// Default number of concurrent classifications per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default attempts per item.
pub const DEFAULT_CLASSIFY_ATTEMPTS: u32 = 3;

/// Default delay between attempts for one item.
pub const DEFAULT_CLASSIFY_BACKOFF: Duration = Duration::from_secs(1);

// ── Classifier trait ───────────────────────────────────────────────

/// A classifier's answer for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub verdict: bool,
    pub rationale: String,
}

impl Verdict {
    pub fn yes(rationale: impl Into<String>) -> Self {
        Self {
            verdict: true,
            rationale: rationale.into(),
        }
    }

    pub fn no(rationale: impl Into<String>) -> Self {
        Self {
            verdict: false,
            rationale: rationale.into(),
        }
    }
}

/// Boxed future returned by [`Classifier::classify`].
pub type ClassifyFuture<'a> = Pin<Box<dyn Future<Output = Result<Verdict, ClassifyError>> + Send + 'a>>;

/// Answers a yes/no question about one item.
pub trait Classifier<T>: Send + Sync {
    fn classify<'a>(&'a self, item: &'a T) -> ClassifyFuture<'a>;
}

/// A closure-based classifier. The item is cloned into each call.
pub struct FnClassifier<F>(F);

impl<F> FnClassifier<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<T, F, Fut> Classifier<T> for FnClassifier<F>
where
    T: Clone + Sync,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Verdict, ClassifyError>> + Send + 'static,
{
    fn classify<'a>(&'a self, item: &'a T) -> ClassifyFuture<'a> {
        Box::pin((self.0)(item.clone()))
    }
}

// ── Data ───────────────────────────────────────────────────────────

/// How an item's classification came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationStatus {
    /// The classifier answered.
    Classified,
    /// Every attempt failed, or the failure was permanent.
    Failed,
    /// Never attempted because of `max_items` or the deadline.
    Skipped,
}

/// The outcome for one input item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<T> {
    pub item: T,
    pub verdict: bool,
    pub rationale: String,
    /// Attempts made, `0` for skipped items.
    pub attempt: u32,
    pub status: ClassificationStatus,
}

impl<T> Classification<T> {
    fn failed(item: T, attempt: u32, reason: impl std::fmt::Display) -> Self {
        Self {
            item,
            verdict: false,
            rationale: format!("classification failed after {attempt} attempt(s): {reason}"),
            attempt,
            status: ClassificationStatus::Failed,
        }
    }

    fn skipped(item: T, reason: &str) -> Self {
        Self {
            item,
            verdict: false,
            rationale: format!("skipped: {reason}"),
            attempt: 0,
            status: ClassificationStatus::Skipped,
        }
    }
}

/// One fixed-size slice of the candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob<T> {
    pub items: Vec<T>,
    pub batch_index: usize,
}

/// Split `items` into consecutive chunks of `batch_size` (floored at 1).
/// The last chunk may be smaller.
pub fn partition<T: Clone>(items: &[T], batch_size: usize) -> Vec<BatchJob<T>> {
    items
        .chunks(batch_size.max(1))
        .enumerate()
        .map(|(batch_index, chunk)| BatchJob {
            items: chunk.to_vec(),
            batch_index,
        })
        .collect()
}

// ── Progress events & observer trait ───────────────────────────────

/// Progress events emitted by [`BatchClassifier::classify`].
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// Classification is starting.
    Started {
        total: usize,
        batches: usize,
        skipped: usize,
    },
    /// A chunk is about to run.
    BatchStarted { batch_index: usize, size: usize },
    /// A chunk finished.
    BatchFinished {
        batch_index: usize,
        relevant: usize,
        failed: usize,
        done: usize,
        total: usize,
    },
    /// The deadline passed; remaining chunks are skipped.
    Deadline { skipped: usize },
    /// Every item has a classification.
    Finished {
        relevant: usize,
        failed: usize,
        skipped: usize,
    },
}

impl BatchEvent {
    /// One-line progress string for status bars and logs.
    pub fn phase_string(&self, prefix: &str) -> String {
        match self {
            Self::Started { total, .. } => format!("{prefix} (0/{total})"),
            Self::BatchStarted { batch_index, size } => {
                format!("{prefix}: batch {} ({size} items)", batch_index + 1)
            }
            Self::BatchFinished { done, total, .. } => format!("{prefix} ({done}/{total})"),
            Self::Deadline { skipped } => format!("{prefix}: deadline, skipping {skipped}"),
            Self::Finished {
                relevant,
                failed,
                skipped,
            } => format!("{prefix} (done: {relevant} relevant, {failed} failed, {skipped} skipped)"),
        }
    }
}

/// Observer for classification progress.
pub trait BatchObserver: Send + Sync {
    fn on_batch_event(&self, event: &BatchEvent);
}

// ── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Concurrent classifications per chunk. Values below 1 behave as 1.
    pub batch_size: usize,
    /// Retry policy applied to each item.
    pub retry: RetryConfig,
    /// Classify at most this many distinct items; the rest are skipped.
    pub max_items: Option<usize>,
    /// No new chunk starts after this much time has passed.
    pub deadline: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::fixed(DEFAULT_CLASSIFY_ATTEMPTS, DEFAULT_CLASSIFY_BACKOFF),
            max_items: None,
            deadline: None,
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_max_items(mut self, max_items: Option<usize>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

// ── Report ─────────────────────────────────────────────────────────

/// Every distinct input item with its classification, in input order.
#[derive(Debug, Clone)]
pub struct BatchReport<T> {
    classifications: Vec<Classification<T>>,
    index: HashMap<T, usize>,
    jobs: Vec<BatchJob<T>>,
}

impl<T: Eq + Hash + Clone> BatchReport<T> {
    /// Number of distinct items, always equal to the distinct input count.
    pub fn len(&self) -> usize {
        self.classifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classifications.is_empty()
    }

    pub fn get(&self, item: &T) -> Option<&Classification<T>> {
        self.index.get(item).map(|&i| &self.classifications[i])
    }

    /// Items with `verdict == true`, in original input order.
    pub fn relevant(&self) -> Vec<&T> {
        self.classifications
            .iter()
            .filter(|c| c.verdict)
            .map(|c| &c.item)
            .collect()
    }

    /// Classifications in original input order.
    pub fn iter(&self) -> impl Iterator<Item = &Classification<T>> {
        self.classifications.iter()
    }

    /// The chunks that were scheduled (skipped-by-limit items excluded).
    pub fn jobs(&self) -> &[BatchJob<T>] {
        &self.jobs
    }

    pub fn relevant_count(&self) -> usize {
        self.classifications.iter().filter(|c| c.verdict).count()
    }

    pub fn failed_count(&self) -> usize {
        self.count_status(ClassificationStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count_status(ClassificationStatus::Skipped)
    }

    fn count_status(&self, status: ClassificationStatus) -> usize {
        self.classifications
            .iter()
            .filter(|c| c.status == status)
            .count()
    }

    pub fn into_classifications(self) -> Vec<Classification<T>> {
        self.classifications
    }
}

// ── BatchClassifier ────────────────────────────────────────────────

/// Runs a [`Classifier`] over many items with bounded concurrency.
pub struct BatchClassifier {
    config: BatchConfig,
    observer: Option<Box<dyn BatchObserver>>,
}

impl BatchClassifier {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Attach an observer for progress events.
    pub fn observer(mut self, obs: impl BatchObserver + 'static) -> Self {
        self.observer = Some(Box::new(obs));
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Classify every distinct item in `items`.
    ///
    /// Duplicates collapse to their first occurrence. The report holds one
    /// entry per distinct item even when every call fails.
    pub async fn classify<T, C>(&self, items: Vec<T>, classifier: &C) -> BatchReport<T>
    where
        T: Eq + Hash + Clone + Debug + Send + Sync,
        C: Classifier<T> + ?Sized,
    {
        let distinct = dedupe(items);
        let total = distinct.len();
        if total == 0 {
            return BatchReport {
                classifications: Vec::new(),
                index: HashMap::new(),
                jobs: Vec::new(),
            };
        }

        let limit = self.config.max_items.unwrap_or(total).min(total);
        let (scheduled, over_limit) = distinct.split_at(limit);
        let jobs = partition(scheduled, self.config.effective_batch_size());
        let invoker = RetryingInvoker::new(self.config.retry.clone()).with_label("classification");

        let mut results: HashMap<T, Classification<T>> = HashMap::with_capacity(total);
        for item in over_limit {
            results.insert(
                item.clone(),
                Classification::skipped(item.clone(), &format!("exceeds max_items limit of {limit}")),
            );
        }
        if !over_limit.is_empty() {
            warn!(
                "Classifying {limit} of {total} items; {} over the limit are skipped",
                over_limit.len()
            );
        }

        self.emit(&BatchEvent::Started {
            total,
            batches: jobs.len(),
            skipped: over_limit.len(),
        });
        info!(
            "Classifying {total} item(s) in {} batch(es) of up to {}",
            jobs.len(),
            self.config.effective_batch_size()
        );

        let started = tokio::time::Instant::now();
        let mut done = over_limit.len();

        for (position, job) in jobs.iter().enumerate() {
            if let Some(deadline) = self.config.deadline
                && started.elapsed() >= deadline
            {
                let remaining: Vec<&T> = jobs
                    .get(position..)
                    .unwrap_or_default()
                    .iter()
                    .flat_map(|j| j.items.iter())
                    .collect();
                warn!(
                    "Classification deadline reached; skipping {} item(s)",
                    remaining.len()
                );
                self.emit(&BatchEvent::Deadline {
                    skipped: remaining.len(),
                });
                for item in remaining {
                    results.insert(
                        item.clone(),
                        Classification::skipped(item.clone(), "deadline reached before classification"),
                    );
                }
                break;
            }

            self.emit(&BatchEvent::BatchStarted {
                batch_index: job.batch_index,
                size: job.items.len(),
            });

            let outcomes = join_all(
                job.items
                    .iter()
                    .map(|item| classify_one(&invoker, classifier, item)),
            )
            .await;

            let relevant = outcomes.iter().filter(|c| c.verdict).count();
            let failed = outcomes
                .iter()
                .filter(|c| c.status == ClassificationStatus::Failed)
                .count();
            done += outcomes.len();
            for outcome in outcomes {
                results.insert(outcome.item.clone(), outcome);
            }

            debug!(
                "Batch {} done: {relevant} relevant, {failed} failed ({done}/{total})",
                job.batch_index + 1
            );
            self.emit(&BatchEvent::BatchFinished {
                batch_index: job.batch_index,
                relevant,
                failed,
                done,
                total,
            });
        }

        let mut classifications = Vec::with_capacity(total);
        let mut index = HashMap::with_capacity(total);
        for item in &distinct {
            if let Some(c) = results.remove(item) {
                index.insert(item.clone(), classifications.len());
                classifications.push(c);
            }
        }

        let report = BatchReport {
            classifications,
            index,
            jobs,
        };
        info!(
            "Classification finished: {} relevant, {} failed, {} skipped of {total}",
            report.relevant_count(),
            report.failed_count(),
            report.skipped_count()
        );
        self.emit(&BatchEvent::Finished {
            relevant: report.relevant_count(),
            failed: report.failed_count(),
            skipped: report.skipped_count(),
        });
        report
    }

    fn emit(&self, event: &BatchEvent) {
        if let Some(obs) = &self.observer {
            obs.on_batch_event(event);
        }
    }
}

/// Drop repeated items, keeping first occurrences in order.
fn dedupe<T: Eq + Hash + Clone>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Classify one item under retry, converting every failure mode into a
/// fail-closed classification.
async fn classify_one<T, C>(invoker: &RetryingInvoker, classifier: &C, item: &T) -> Classification<T>
where
    T: Clone + Debug + Sync,
    C: Classifier<T> + ?Sized,
{
    let attempts = AtomicU32::new(0);
    let guarded = AssertUnwindSafe(invoker.invoke_counted(|| {
        attempts.fetch_add(1, Ordering::Relaxed);
        classifier.classify(item)
    }))
    .catch_unwind()
    .await;

    match guarded {
        Ok(RetryOutcome {
            result: Ok(verdict),
            attempts,
        }) => Classification {
            item: item.clone(),
            verdict: verdict.verdict,
            rationale: verdict.rationale,
            attempt: attempts,
            status: ClassificationStatus::Classified,
        },
        Ok(RetryOutcome {
            result: Err(e),
            attempts,
        }) => {
            debug!("Classification of {item:?} failed: {e}");
            Classification::failed(item.clone(), attempts, e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("Classification of {item:?} panicked: {message}");
            Classification::failed(
                item.clone(),
                attempts.load(Ordering::Relaxed).max(1),
                format!("panicked: {message}"),
            )
        }
    }
}
