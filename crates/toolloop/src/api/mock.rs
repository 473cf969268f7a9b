//! Scripted [`ModelService`] for tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::service::{ModelFuture, ModelService};
use crate::error::ServiceError;
use crate::{ModelRequest, ModelResponse};

type Responder = Box<dyn Fn(&ModelRequest) -> Result<ModelResponse, ServiceError> + Send + Sync>;

/// Replays queued responses in order, then falls back to a responder
/// function if one is set. Every request is recorded.
///
/// # Examples
///
/// ```
/// use toolloop::api::mock::ScriptedService;
/// use toolloop::ModelResponse;
///
/// let service = ScriptedService::new()
///     .then_respond(ModelResponse::text("first"))
///     .then_respond(ModelResponse::text("second"));
/// assert_eq!(service.remaining(), 2);
/// ```
#[derive(Default)]
pub struct ScriptedService {
    script: Mutex<VecDeque<Result<ModelResponse, ServiceError>>>,
    fallback: Option<Responder>,
    requests: Mutex<Vec<ModelRequest>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that answers every request with `f`.
    pub fn responder<F>(f: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelResponse, ServiceError> + Send + Sync + 'static,
    {
        Self::new().with_fallback(f)
    }

    /// Queue a successful response.
    pub fn then_respond(self, response: ModelResponse) -> Self {
        lock(&self.script).push_back(Ok(response));
        self
    }

    /// Queue a failure.
    pub fn then_fail(self, error: ServiceError) -> Self {
        lock(&self.script).push_back(Err(error));
        self
    }

    /// Used once the queue is empty.
    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelResponse, ServiceError> + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }

    /// Number of `complete` calls so far.
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Queued responses not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<ModelRequest> {
        lock(&self.requests).last().cloned()
    }

    fn answer(&self, request: &ModelRequest) -> Result<ModelResponse, ServiceError> {
        lock(&self.requests).push(request.clone());
        if let Some(next) = lock(&self.script).pop_front() {
            return next;
        }
        match &self.fallback {
            Some(f) => f(request),
            None => Err(ServiceError::fatal("scripted service has no more responses")),
        }
    }
}

impl ModelService for ScriptedService {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        let result = self.answer(request);
        Box::pin(async move { result })
    }
}
