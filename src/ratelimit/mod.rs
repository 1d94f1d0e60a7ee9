//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod memory;
mod reclaimer;

pub use backend::RateLimiterStore;
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{
    MemoryStore, RateLimiterConfig, Visitor, DEFAULT_BURST, DEFAULT_EXPIRES_IN, DEFAULT_RATE,
    MAX_PERIOD,
};
pub use reclaimer::Reclaimer;
