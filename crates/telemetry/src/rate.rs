//! Per-agent sliding-window rate limiter.
//!
//! Each agent has an ordered list of invocation timestamps; entries older
//! than the window are pruned on any access. A single mutex guards the map
//! so prune/check/record sequences cannot interleave between requests.
//!
//! The pipeline calls `check` before dispatch and `record` only after a
//! successful dispatch — failed dispatches never consume quota.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter, 60 second window by default.
pub struct RateLimiter {
    window: Duration,
    entries: Mutex<HashMap<String, Vec<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(60))
    }

    /// A limiter with a custom window, for tests.
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the agent is under its limit. A limit of 0 disables the
    /// check entirely.
    pub fn check(&self, agent: &str, limit: u32) -> bool {
        if limit == 0 {
            return true;
        }
        let mut entries = self.entries.lock().unwrap();
        let count = match entries.get_mut(agent) {
            Some(stamps) => {
                Self::prune(stamps, self.window);
                stamps.len()
            }
            None => 0,
        };
        count < limit as usize
    }

    /// Record one invocation for the agent.
    pub fn record(&self, agent: &str) {
        let mut entries = self.entries.lock().unwrap();
        let stamps = entries.entry(agent.to_string()).or_default();
        Self::prune(stamps, self.window);
        stamps.push(Instant::now());
    }

    /// The number of invocations inside the current window.
    pub fn usage(&self, agent: &str) -> usize {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(agent) {
            Some(stamps) => {
                Self::prune(stamps, self.window);
                stamps.len()
            }
            None => 0,
        }
    }

    fn prune(stamps: &mut Vec<Instant>, window: Duration) {
        let now = Instant::now();
        stamps.retain(|t| now.duration_since(*t) < window);
    }
}
