//! Middleware service that enforces per-identifier rate limits.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::{Request, Response};
use tower::Service;
use tracing::debug;

use super::layer::{Policy, Verdict};

/// Service produced by [`RateLimitLayer`](super::RateLimitLayer).
///
/// Rejections are rendered as responses, so the error type is the inner
/// service's and the service stacks under `axum::Router::layer`.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    policy: Arc<Policy>,
}

impl<S> RateLimitService<S> {
    pub(crate) fn new(inner: S, policy: Arc<Policy>) -> Self {
        Self { inner, policy }
    }

    /// Get a reference to the wrapped service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            match policy.evaluate(&parts).await {
                Verdict::Proceed => inner.call(Request::from_parts(parts, body)).await,
                Verdict::Reject(rejection) => {
                    debug!(rejection = %rejection, "Rejected request");
                    Ok(rejection.into_response())
                }
            }
        })
    }
}

impl<S> std::fmt::Debug for RateLimitService<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService")
            .field("inner", &self.inner)
            .finish()
    }
}
