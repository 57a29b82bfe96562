//! Thread-safe metrics registry — counts requests by outcome, agent, and
//! provider, and serves a consistent snapshot.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Counters for one agent or one provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallCounters {
    pub total: u64,
    pub ok: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    ok: u64,
    errors: u64,
    by_agent: HashMap<String, CallCounters>,
    by_provider: HashMap<String, CallCounters>,
}

/// A consistent view of the registry at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub total_requests: u64,
    pub total_ok: u64,
    pub total_errors: u64,
    pub by_agent: HashMap<String, CallCounters>,
    pub by_provider: HashMap<String, CallCounters>,
}

/// The in-memory metrics registry.
pub struct MetricsRegistry {
    started_at: Instant,
    counters: Mutex<Counters>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Record one finished request.
    ///
    /// `agent` and `provider` are None when the request failed before they
    /// were established (invalid JSON, unknown agent); the global totals
    /// still tick.
    pub fn record(&self, agent: Option<&str>, provider: Option<&str>, ok: bool) {
        let mut counters = self.counters.lock().unwrap();
        counters.total += 1;
        if ok {
            counters.ok += 1;
        } else {
            counters.errors += 1;
        }

        if let Some(agent) = agent {
            bump(counters.by_agent.entry(agent.to_string()).or_default(), ok);
        }
        if let Some(provider) = provider {
            bump(
                counters.by_provider.entry(provider.to_string()).or_default(),
                ok,
            );
        }
    }

    /// Take a consistent snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().unwrap();
        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total_requests: counters.total,
            total_ok: counters.ok,
            total_errors: counters.errors,
            by_agent: counters.by_agent.clone(),
            by_provider: counters.by_provider.clone(),
        }
    }
}

fn bump(counters: &mut CallCounters, ok: bool) {
    counters.total += 1;
    if ok {
        counters.ok += 1;
    } else {
        counters.errors += 1;
    }
}
