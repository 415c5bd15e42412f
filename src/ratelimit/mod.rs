//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod clock;
mod janitor;
mod key;
mod limiter;
mod rules;
mod window;

pub use backend::RateLimiterBackend;
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use janitor::Janitor;
pub use key::BucketKey;
pub use limiter::{Decision, RateLimiter};
pub use rules::{Policy, PolicyRule, PolicyTable, DEFAULT_LIMIT, DEFAULT_WINDOW_SECS};
pub use window::{SlidingWindowLimiter, ThrottleRegistry};
