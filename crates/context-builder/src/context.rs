//! The growing answer: an ordered, de-duplicated set of selected files.
//!
//! [`ContextSet`] is a cheap-to-clone handle. Every tool that reads or
//! grows the selection holds a clone, and the binary reads the final
//! contents after the run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    order: Vec<String>,
    seen: HashSet<String>,
}

/// Selected file paths in the order they were first added.
#[derive(Debug, Clone, Default)]
pub struct ContextSet(Arc<Mutex<Inner>>);

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add `path`. Returns `false` if it was already present.
    pub fn add(&self, path: impl Into<String>) -> bool {
        let path = path.into();
        let mut inner = self.lock();
        if !inner.seen.insert(path.clone()) {
            return false;
        }
        inner.order.push(path);
        true
    }

    /// Add every path, returning how many were new.
    pub fn extend<I, S>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        paths.into_iter().map(|p| self.add(p)).filter(|&new| new).count()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().seen.contains(path)
    }

    /// Snapshot of the selection in insertion order.
    pub fn paths(&self) -> Vec<String> {
        self.lock().order.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
