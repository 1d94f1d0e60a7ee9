//! In-memory visitor registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};

use super::backend::RateLimiterStore;
use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError, TollgateError};

/// Rate used when neither rate nor burst is configured.
pub const DEFAULT_RATE: f64 = 10.0;
/// Burst used when neither rate nor burst is configured.
pub const DEFAULT_BURST: u32 = 30;
/// How long an identifier may stay idle before its state can be reclaimed.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3 * 60);
/// Longest accepted expiry window or reclaim interval (about a century).
pub const MAX_PERIOD: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Reject a period that a tokio timer could not be scheduled for.
pub(crate) fn validate_period(name: &str, period: Duration) -> Result<()> {
    let schedulable =
        period <= MAX_PERIOD && tokio::time::Instant::now().checked_add(period).is_some();
    if !schedulable {
        return Err(TollgateError::Config(format!(
            "{} must be at most {} seconds, got {}",
            name,
            MAX_PERIOD.as_secs(),
            period.as_secs()
        )));
    }
    Ok(())
}

/// Configuration for a [`MemoryStore`].
///
/// Zero values mean "unset" and are replaced by defaults when the store is
/// built; see [`RateLimiterConfig::resolve`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimiterConfig {
    /// Tokens added per second
    pub rate: f64,
    /// Maximum bucket capacity
    pub burst: u32,
    /// Idle time after which a visitor is evictable
    pub expires_in: Duration,
    /// Soft cap on tracked identifiers; `None` leaves the registry unbounded
    pub max_visitors: Option<usize>,
}

impl RateLimiterConfig {
    /// Create a configuration with the given rate and burst.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst,
            ..Default::default()
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn with_max_visitors(mut self, max_visitors: usize) -> Self {
        self.max_visitors = Some(max_visitors);
        self
    }

    /// Fill in unset values.
    ///
    /// - rate and burst both unset: `DEFAULT_RATE` / `DEFAULT_BURST`
    /// - burst unset: the rate rounded up, at least 1
    /// - expiry unset: `DEFAULT_EXPIRES_IN`
    pub fn resolve(mut self) -> Self {
        if self.rate == 0.0 && self.burst == 0 {
            self.rate = DEFAULT_RATE;
            self.burst = DEFAULT_BURST;
        } else if self.burst == 0 && self.rate.is_finite() && self.rate > 0.0 {
            self.burst = (self.rate.ceil() as u32).max(1);
        }
        if self.expires_in.is_zero() {
            self.expires_in = DEFAULT_EXPIRES_IN;
        }
        self
    }
}

/// One identifier's limiting state.
#[derive(Debug, Clone)]
pub struct Visitor {
    bucket: TokenBucket,
    last_seen: DateTime<Utc>,
}

impl Visitor {
    fn new(bucket: TokenBucket, now: DateTime<Utc>) -> Self {
        Self {
            bucket,
            last_seen: now,
        }
    }

    fn admit(&mut self, now: DateTime<Utc>) -> bool {
        self.last_seen = now;
        self.bucket.allow(now)
    }

    fn is_stale(&self, now: DateTime<Utc>, expires_in: Duration) -> bool {
        // A negative age (clock moved back) is never stale.
        match now.signed_duration_since(self.last_seen).to_std() {
            Ok(age) => age > expires_in,
            Err(_) => false,
        }
    }

    /// Get the bucket state.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Get the time of the most recent request.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }
}

/// Token-bucket store keeping one [`Visitor`] per identifier in memory.
///
/// The registry is sharded: a request locks only the shard holding its
/// identifier, for the duration of a lookup and a bucket update.
#[derive(Debug)]
pub struct MemoryStore {
    /// Visitors indexed by identifier
    visitors: DashMap<String, Visitor>,
    rate: f64,
    burst: u32,
    expires_in: Duration,
    max_visitors: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store reading the system clock.
    pub fn new(config: RateLimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store with an injected clock.
    pub fn with_clock(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let config = config.resolve();

        // Validates rate and burst once so per-request creation cannot fail.
        TokenBucket::new(config.rate, config.burst, clock.now())?;
        validate_period("expires_in", config.expires_in)?;

        debug!(
            rate = config.rate,
            burst = config.burst,
            expires_in_secs = config.expires_in.as_secs_f64(),
            max_visitors = ?config.max_visitors,
            "Creating in-memory rate limiter store"
        );

        Ok(Self {
            visitors: DashMap::new(),
            rate: config.rate,
            burst: config.burst,
            expires_in: config.expires_in,
            max_visitors: config.max_visitors,
            clock,
        })
    }

    /// Record a request for `identifier` and decide whether it is admitted.
    ///
    /// The lookup, the creation of a missing visitor and the token deduction
    /// all happen under the lock of the identifier's shard.
    pub fn admit(&self, identifier: &str) -> std::result::Result<bool, StoreError> {
        let now = self.clock.now();

        let existing = self
            .visitors
            .get_mut(identifier)
            .map(|mut visitor| visitor.admit(now));
        if let Some(allowed) = existing {
            trace!(identifier = %identifier, allowed, "Checked rate limit");
            return Ok(allowed);
        }

        // `len` locks every shard, so it must run before `entry` takes one.
        if let Some(limit) = self.max_visitors {
            if self.visitors.len() >= limit {
                debug!(
                    identifier = %identifier,
                    limit,
                    "Visitor registry full, refusing new identifier"
                );
                return Err(StoreError::CapacityExceeded { limit });
            }
        }

        // A concurrent caller may have inserted the visitor in the meantime;
        // `entry` settles the race under the shard lock.
        let mut created = false;
        let allowed = self
            .visitors
            .entry(identifier.to_string())
            .or_insert_with(|| {
                created = true;
                Visitor::new(TokenBucket::full(self.rate, self.burst, now), now)
            })
            .admit(now);

        if created {
            debug!(identifier = %identifier, "Tracking new visitor");
        }
        trace!(identifier = %identifier, allowed, "Checked rate limit");
        Ok(allowed)
    }

    /// Remove every visitor idle for longer than the expiry window.
    ///
    /// "Now" is read once, so a visitor seen while the pass runs is kept.
    /// Shards are locked one at a time.
    pub fn reclaim(&self) -> usize {
        let now = self.clock.now();
        let expires_in = self.expires_in;
        let mut removed = 0;

        self.visitors.retain(|_, visitor| {
            let stale = visitor.is_stale(now, expires_in);
            if stale {
                removed += 1;
            }
            !stale
        });

        debug!(
            removed,
            remaining = self.visitors.len(),
            "Reclaimed stale visitors"
        );
        removed
    }

    /// Get a copy of the state tracked for `identifier`.
    pub fn visitor(&self, identifier: &str) -> Option<Visitor> {
        self.visitors.get(identifier).map(|v| v.value().clone())
    }

    /// Check whether `identifier` is currently tracked.
    pub fn contains(&self, identifier: &str) -> bool {
        self.visitors.contains_key(identifier)
    }

    /// Get the number of tracked identifiers.
    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    /// Forget every visitor.
    pub fn clear(&self) {
        self.visitors.clear();
    }

    /// Get the refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Get the bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Get the idle time after which visitors are evictable.
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    pub fn max_visitors(&self) -> Option<usize> {
        self.max_visitors
    }
}

#[async_trait]
impl RateLimiterStore for MemoryStore {
    async fn allow(&self, identifier: &str) -> std::result::Result<bool, StoreError> {
        self.admit(identifier)
    }
}
