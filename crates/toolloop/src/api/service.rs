//! The model service seam.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::{ModelRequest, ModelResponse};

/// Boxed future returned by [`ModelService::complete`].
pub type ModelFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ModelResponse, ServiceError>> + Send + 'a>>;

/// Anything that can answer a [`ModelRequest`].
///
/// Implementations classify their own failures: rate limits, server errors
/// and dropped connections are [`ServiceError::Transient`]; everything else
/// is [`ServiceError::Fatal`].
pub trait ModelService: Send + Sync {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a>;
}

impl<S: ModelService + ?Sized> ModelService for Arc<S> {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        (**self).complete(request)
    }
}

impl<S: ModelService + ?Sized> ModelService for &S {
    fn complete<'a>(&'a self, request: &'a ModelRequest) -> ModelFuture<'a> {
        (**self).complete(request)
    }
}
