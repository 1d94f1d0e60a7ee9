//! Store trait for abstracting in-memory and future shared backends.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// Trait for rate limiter store implementations.
///
/// The middleware only ever calls [`allow`](RateLimiterStore::allow), so any
/// backend that can answer "may this identifier proceed now?" plugs in
/// without touching request handling.
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    /// Record one request for `identifier` and report whether it is admitted.
    ///
    /// `Ok(false)` is a normal denial. `Err` means the store could not decide.
    async fn allow(&self, identifier: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S> RateLimiterStore for Arc<S>
where
    S: RateLimiterStore + ?Sized,
{
    async fn allow(&self, identifier: &str) -> Result<bool, StoreError> {
        (**self).allow(identifier).await
    }
}
