use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic over one simulated link at a point in time.
#[derive(Serialize, Default, Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub transmitted_datagrams: u64,
    pub transmitted_bytes: u64,
    pub delivered_datagrams: u64,
    pub delivered_bytes: u64,
    pub lost_datagrams: u64,
}

impl Stats {
    /// Datagrams handed to the link that have neither arrived nor been lost.
    pub fn in_flight(&self) -> u64 {
        self.transmitted_datagrams
            .saturating_sub(self.delivered_datagrams + self.lost_datagrams)
    }
}

/// Lock-free link counters, updated through a shared reference.
#[derive(Debug)]
pub struct AtomicStats {
    transmitted_datagrams: AtomicU64,
    transmitted_bytes: AtomicU64,
    delivered_datagrams: AtomicU64,
    delivered_bytes: AtomicU64,
    lost_datagrams: AtomicU64,
}

impl Default for AtomicStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicStats {
    pub const fn new() -> Self {
        Self {
            transmitted_datagrams: AtomicU64::new(0),
            transmitted_bytes: AtomicU64::new(0),
            delivered_datagrams: AtomicU64::new(0),
            delivered_bytes: AtomicU64::new(0),
            lost_datagrams: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_transmit(&self, bytes: usize) {
        self.transmitted_datagrams.fetch_add(1, Ordering::Relaxed);
        self.transmitted_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery(&self, bytes: usize) {
        self.delivered_datagrams.fetch_add(1, Ordering::Relaxed);
        self.delivered_bytes
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_loss(&self) {
        self.lost_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics.
    /// Counters are read one by one, so a snapshot taken during concurrent
    /// updates may be slightly inconsistent.
    pub fn snapshot(&self) -> Stats {
        Stats {
            transmitted_datagrams: self.transmitted_datagrams.load(Ordering::Relaxed),
            transmitted_bytes: self.transmitted_bytes.load(Ordering::Relaxed),
            delivered_datagrams: self.delivered_datagrams.load(Ordering::Relaxed),
            delivered_bytes: self.delivered_bytes.load(Ordering::Relaxed),
            lost_datagrams: self.lost_datagrams.load(Ordering::Relaxed),
        }
    }
}
