//! Tollgate - Per-identifier Admission Control
//!
//! This crate implements a token-bucket rate limiter that tracks a budget
//! per client identifier (address, API key, tenant id) and a `tower`
//! middleware that admits or rejects each request against it. Idle
//! identifiers are reclaimed by a background task.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod server;

pub use error::{Result, TollgateError};
pub use middleware::{HttpError, RateLimitLayer};
pub use ratelimit::{MemoryStore, RateLimiterConfig, RateLimiterStore, Reclaimer};
