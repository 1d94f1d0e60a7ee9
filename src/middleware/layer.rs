//! Middleware configuration and the admission decision.

use std::fmt;
use std::sync::Arc;

use http::request::Parts;
use tower::Layer;
use tracing::{debug, trace, warn};

use super::identifier::{self, IdentifierExtractor};
use super::rejection::HttpError;
use super::service::RateLimitService;
use crate::error::{AdmissionError, IdentifierError, Result, TollgateError};
use crate::ratelimit::RateLimiterStore;

/// Returns `true` to let a request bypass rate limiting entirely.
pub type Skipper = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;
/// Runs before the identifier is extracted, for side effects.
pub type BeforeFn = Arc<dyn Fn(&Parts) + Send + Sync>;
/// Builds the outcome for an identifier that is over budget.
pub type DenyHandler = Arc<dyn Fn(&Parts, &str) -> HttpError + Send + Sync>;
/// Builds the outcome when extraction or the store fails.
pub type ErrorHandler = Arc<dyn Fn(&Parts, &AdmissionError) -> HttpError + Send + Sync>;

/// What to do when the store cannot decide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreErrorPolicy {
    /// Reject the request through the error handler.
    #[default]
    FailClosed,
    /// Log the failure and let the request through.
    FailOpen,
}

pub(crate) enum Verdict {
    Proceed,
    Reject(HttpError),
}

/// The configured hooks plus the store. Shared by every service clone.
pub(crate) struct Policy {
    store: Arc<dyn RateLimiterStore>,
    skipper: Option<Skipper>,
    before: Option<BeforeFn>,
    extractor: IdentifierExtractor,
    deny_handler: DenyHandler,
    error_handler: ErrorHandler,
    on_store_error: StoreErrorPolicy,
}

impl Policy {
    /// No hooks, the `real_ip` extractor and the default handlers.
    fn with_defaults(store: Arc<dyn RateLimiterStore>) -> Self {
        Self {
            store,
            skipper: None,
            before: None,
            extractor: Arc::new(identifier::real_ip),
            deny_handler: Arc::new(default_deny_handler),
            error_handler: Arc::new(default_error_handler),
            on_store_error: StoreErrorPolicy::default(),
        }
    }

    pub(crate) async fn evaluate(&self, parts: &Parts) -> Verdict {
        if self.skipper.as_ref().is_some_and(|skip| skip(parts)) {
            trace!(path = %parts.uri.path(), "Skipping rate limit");
            return Verdict::Proceed;
        }

        if let Some(before) = &self.before {
            before(parts);
        }

        let identifier = match (self.extractor)(parts) {
            Ok(identifier) => identifier,
            Err(e) => {
                debug!(error = %e, "Failed to extract rate limit identifier");
                let error = AdmissionError::from(e);
                return Verdict::Reject((self.error_handler)(parts, &error));
            }
        };

        match self.store.allow(&identifier).await {
            Ok(true) => Verdict::Proceed,
            Ok(false) => {
                debug!(identifier = %identifier, "Rate limit exceeded");
                Verdict::Reject((self.deny_handler)(parts, &identifier))
            }
            Err(e) => match self.on_store_error {
                StoreErrorPolicy::FailClosed => {
                    warn!(
                        identifier = %identifier,
                        error = %e,
                        "Rate limiter store failed, rejecting request"
                    );
                    let error = AdmissionError::from(e);
                    Verdict::Reject((self.error_handler)(parts, &error))
                }
                StoreErrorPolicy::FailOpen => {
                    warn!(
                        identifier = %identifier,
                        error = %e,
                        "Rate limiter store failed, admitting request"
                    );
                    Verdict::Proceed
                }
            },
        }
    }
}

/// Default deny outcome: 429 "rate limit exceeded".
pub fn default_deny_handler(_parts: &Parts, _identifier: &str) -> HttpError {
    HttpError::too_many_requests()
}

/// Default error outcome: 403 for a bad identifier, 503 for a failed store.
pub fn default_error_handler(_parts: &Parts, error: &AdmissionError) -> HttpError {
    match error {
        AdmissionError::Identifier(e) => HttpError::forbidden(e.to_string()),
        AdmissionError::Store(e) => HttpError::service_unavailable(e.to_string()),
    }
}

/// A layer that rate limits requests per identifier using a
/// [`RateLimiterStore`].
#[derive(Clone)]
pub struct RateLimitLayer {
    policy: Arc<Policy>,
}

impl RateLimitLayer {
    /// Start configuring a layer. A store is required.
    pub fn builder() -> RateLimitLayerBuilder {
        RateLimitLayerBuilder::default()
    }

    /// Create a layer with default hooks.
    pub fn new<S>(store: S) -> Self
    where
        S: RateLimiterStore + 'static,
    {
        Self {
            policy: Arc::new(Policy::with_defaults(Arc::new(store))),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService::new(inner, self.policy.clone())
    }
}

impl fmt::Debug for RateLimitLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("skipper", &self.policy.skipper.is_some())
            .field("before", &self.policy.before.is_some())
            .field("on_store_error", &self.policy.on_store_error)
            .finish()
    }
}

/// Builder for [`RateLimitLayer`].
#[derive(Default)]
pub struct RateLimitLayerBuilder {
    store: Option<Arc<dyn RateLimiterStore>>,
    skipper: Option<Skipper>,
    before: Option<BeforeFn>,
    extractor: Option<IdentifierExtractor>,
    deny_handler: Option<DenyHandler>,
    error_handler: Option<ErrorHandler>,
    on_store_error: StoreErrorPolicy,
}

impl RateLimitLayerBuilder {
    pub fn store<S>(mut self, store: S) -> Self
    where
        S: RateLimiterStore + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn shared_store(mut self, store: Arc<dyn RateLimiterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bypass the limiter, including the `before` hook, when `skipper`
    /// returns `true`. Default: never skip.
    pub fn skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Arc::new(skipper));
        self
    }

    pub fn before<F>(mut self, before: F) -> Self
    where
        F: Fn(&Parts) + Send + Sync + 'static,
    {
        self.before = Some(Arc::new(before));
        self
    }

    /// Default: [`identifier::real_ip`].
    pub fn identifier_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Parts) -> std::result::Result<String, IdentifierError> + Send + Sync + 'static,
    {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Use a prebuilt extractor such as [`identifier::header`].
    pub fn shared_identifier_extractor(mut self, extractor: IdentifierExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Default: [`default_deny_handler`].
    pub fn deny_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, &str) -> HttpError + Send + Sync + 'static,
    {
        self.deny_handler = Some(Arc::new(handler));
        self
    }

    /// Default: [`default_error_handler`].
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Parts, &AdmissionError) -> HttpError + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_store_error(mut self, policy: StoreErrorPolicy) -> Self {
        self.on_store_error = policy;
        self
    }

    /// Validate and build the layer.
    ///
    /// Fails when no store was configured.
    pub fn build(self) -> Result<RateLimitLayer> {
        let store = self.store.ok_or_else(|| {
            TollgateError::Config("rate limiter store is required".to_string())
        })?;

        let mut policy = Policy::with_defaults(store);
        policy.skipper = self.skipper;
        policy.before = self.before;
        policy.on_store_error = self.on_store_error;
        if let Some(extractor) = self.extractor {
            policy.extractor = extractor;
        }
        if let Some(handler) = self.deny_handler {
            policy.deny_handler = handler;
        }
        if let Some(handler) = self.error_handler {
            policy.error_handler = handler;
        }

        Ok(RateLimitLayer {
            policy: Arc::new(policy),
        })
    }
}
