//! Request accounting for the BlackRoad gateway.
//!
//! Two process-local structures: a counter registry snapshotted by the
//! metrics endpoint, and a per-agent sliding-window rate limiter. Both are
//! guarded by their own lock; neither persists across restarts.

pub mod metrics;
pub mod rate;

pub use metrics::{CallCounters, MetricsRegistry, MetricsSnapshot};
pub use rate::RateLimiter;
