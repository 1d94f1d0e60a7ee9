//! Background task that evicts idle visitors.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::memory::{validate_period, MemoryStore};
use crate::error::Result;

/// Handle to a running reclaim loop.
///
/// The loop runs [`MemoryStore::reclaim`] once per interval. It stops when
/// [`shutdown`](Reclaimer::shutdown) is called, when the handle is dropped,
/// or when the store itself is dropped.
#[derive(Debug)]
pub struct Reclaimer {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Reclaimer {
    /// Spawn the reclaim loop on the current tokio runtime.
    ///
    /// The first pass runs one full `interval` after spawning. A zero
    /// interval falls back to the store's expiry window. Fails when the
    /// interval is longer than [`MAX_PERIOD`](super::MAX_PERIOD).
    pub fn spawn(store: &Arc<MemoryStore>, interval: Duration) -> Result<Self> {
        let interval = if interval.is_zero() {
            store.expires_in()
        } else {
            interval
        };
        validate_period("reclaim_interval", interval)?;

        let (shutdown, signal) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::downgrade(store), interval, signal));

        info!(
            interval_secs = interval.as_secs_f64(),
            "Started visitor reclaimer"
        );

        Ok(Self {
            shutdown,
            handle: Some(handle),
            interval,
        })
    }

    /// Get the time between reclaim passes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Visitor reclaimer task failed");
            }
        }
        info!("Stopped visitor reclaimer");
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(store: Weak<MemoryStore>, period: Duration, mut signal: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(store) = store.upgrade() else {
                    debug!("Store dropped, visitor reclaimer exiting");
                    return;
                };
                store.reclaim();
            }
            changed = signal.changed() => {
                // A closed channel means the handle is gone.
                if changed.is_err() || *signal.borrow() {
                    return;
                }
            }
        }
    }
}
