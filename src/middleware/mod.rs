//! HTTP middleware that puts a [`RateLimiterStore`](crate::ratelimit::RateLimiterStore)
//! in front of a `tower` service.

pub mod identifier;
mod layer;
mod rejection;
mod service;

pub use identifier::IdentifierExtractor;
pub use layer::{
    default_deny_handler, default_error_handler, BeforeFn, DenyHandler, ErrorHandler,
    RateLimitLayer, RateLimitLayerBuilder, Skipper, StoreErrorPolicy,
};
pub use rejection::HttpError;
pub use service::RateLimitService;
