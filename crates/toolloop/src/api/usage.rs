//! Correlation IDs and token usage accounting.
//!
//! Every driver run gets a `trace_id`, and each iteration within it a
//! `span_id`. Token usage from model calls is summed by a
//! [`UsageAccountant`] (owned by one driver) or a [`SharedUsage`] (atomic,
//! safe to share across concurrently running sub-queries).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::Serialize;

use crate::Usage;

/// Generate a unique trace ID for a driver run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Span ID for one iteration within a run.
pub fn generate_span_id(trace_id: &str, iteration: u32) -> String {
    format!("{trace_id}:i{iteration}")
}

/// Read-only view of accumulated usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Model calls recorded.
    pub calls: u64,
    /// Calls whose response carried no usage (counted as zero tokens).
    pub calls_without_usage: u64,
}

impl UsageSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "tokens: {} input + {} output = {} total over {} call(s)",
            self.input_tokens,
            self.output_tokens,
            self.total_tokens(),
            self.calls,
        )
    }
}

/// Running token totals for a single driver run.
#[derive(Debug, Default)]
pub struct UsageAccountant {
    totals: UsageSnapshot,
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call. `None` counts as zero tokens.
    pub fn record(&mut self, usage: Option<Usage>) {
        self.totals.calls += 1;
        match usage {
            Some(u) => {
                self.totals.input_tokens += u64::from(u.input_tokens);
                self.totals.output_tokens += u64::from(u.output_tokens);
            }
            None => self.totals.calls_without_usage += 1,
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.totals
    }
}

/// Thread-safe usage counters for concurrent sub-queries.
///
/// Wrap in an `Arc` and hand clones to every worker.
#[derive(Debug, Default)]
pub struct SharedUsage {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    calls: AtomicU64,
    calls_without_usage: AtomicU64,
}

impl SharedUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: Option<Usage>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match usage {
            Some(u) => {
                self.input_tokens
                    .fetch_add(u64::from(u.input_tokens), Ordering::Relaxed);
                self.output_tokens
                    .fetch_add(u64::from(u.output_tokens), Ordering::Relaxed);
            }
            None => {
                self.calls_without_usage.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            calls_without_usage: self.calls_without_usage.load(Ordering::Relaxed),
        }
    }
}
