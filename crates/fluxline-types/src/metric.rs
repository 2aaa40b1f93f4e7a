//! Flow statistics counters.
//!
//! The dispatcher records counts with [`FlowStats`] while workers run;
//! [`FlowSnapshot`] is the plain copy handed to callers and the CLI summary.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared across dispatcher workers.
#[derive(Debug, Default)]
pub struct FlowStats {
    sent: AtomicU64,
    delivered: AtomicU64,
    filtered: AtomicU64,
    dropped_capacity: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

impl FlowStats {
    /// A message entered the flow: an ingress send or a splitter emission.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A message finished processing at an endpoint.
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// A filter rejected a message.
    pub fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// A full bounded channel dropped a message.
    pub fn record_dropped_capacity(&self) {
        self.dropped_capacity.fetch_add(1, Ordering::Relaxed);
    }

    /// An endpoint failed (after any retries).
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A processing attempt was retried.
    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// A message reached the dead-letter store.
    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped_capacity: self.dropped_capacity.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the flow counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowSnapshot {
    pub sent: u64,
    pub delivered: u64,
    pub filtered: u64,
    pub dropped_capacity: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}
