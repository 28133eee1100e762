//! Forwarder statistics.
//!
//! Write-only counters, the only user-visible signal of failure: every drop
//! inside the engine lands in exactly one bucket here. All writes use
//! `Relaxed` ordering — these are sampling metrics, not synchronisation.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use serde::Serialize;

pub struct ForwarderStats {
    /// Multicast datagrams handed to the accept path.
    pub mcast_in_all: AtomicU64,
    /// Inbound datagrams accepted as new.
    pub mcast_in_unique: AtomicU64,
    /// Cached datagrams re-transmitted during periodic processing.
    pub mcast_fwd: AtomicU64,
    /// Locally originated datagrams emitted.
    pub mcast_out: AtomicU64,
    /// Malformed multicast input.
    pub mcast_bad: AtomicU64,
    /// Duplicates, stale arrivals, and resource-exhaustion drops.
    pub mcast_dropped: AtomicU64,
    /// Summary messages handed to the control path.
    pub icmp_in: AtomicU64,
    /// Summary messages emitted.
    pub icmp_out: AtomicU64,
    /// Summary messages rejected during validation.
    pub icmp_bad: AtomicU64,
}

/// Plain-struct snapshot of [`ForwarderStats`] for display (no atomics).
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub mcast_in_all: u64,
    pub mcast_in_unique: u64,
    pub mcast_fwd: u64,
    pub mcast_out: u64,
    pub mcast_bad: u64,
    pub mcast_dropped: u64,
    pub icmp_in: u64,
    pub icmp_out: u64,
    pub icmp_bad: u64,
}

impl ForwarderStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mcast_in_all: AtomicU64::new(0),
            mcast_in_unique: AtomicU64::new(0),
            mcast_fwd: AtomicU64::new(0),
            mcast_out: AtomicU64::new(0),
            mcast_bad: AtomicU64::new(0),
            mcast_dropped: AtomicU64::new(0),
            icmp_in: AtomicU64::new(0),
            icmp_out: AtomicU64::new(0),
            icmp_bad: AtomicU64::new(0),
        })
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            mcast_in_all: self.mcast_in_all.load(Relaxed),
            mcast_in_unique: self.mcast_in_unique.load(Relaxed),
            mcast_fwd: self.mcast_fwd.load(Relaxed),
            mcast_out: self.mcast_out.load(Relaxed),
            mcast_bad: self.mcast_bad.load(Relaxed),
            mcast_dropped: self.mcast_dropped.load(Relaxed),
            icmp_in: self.icmp_in.load(Relaxed),
            icmp_out: self.icmp_out.load(Relaxed),
            icmp_bad: self.icmp_bad.load(Relaxed),
        }
    }
}
