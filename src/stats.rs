//! Packet-processing statistics
//!
//! Counters are owned by the decoder thread that increments them and merged
//! into a report on rotation or shutdown; nothing here is per-packet atomic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-thread packet processing counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcStat {
    /// Frames handed to the decoder
    pub packets: u64,

    /// Frames skipped (IEEE 802.3, unhandled ethertype)
    pub skipped: u64,

    /// Unknown link type, IP version or MPLS payload
    pub unknown: u64,

    /// Truncated frames and impossible length fields
    pub short_snap: u64,

    /// IPv4 fragments dropped (no reassembly)
    pub frag_dropped: u64,
}

impl ProcStat {
    /// Fold another thread's counters into this one
    pub fn merge(&mut self, other: &ProcStat) {
        self.packets += other.packets;
        self.skipped += other.skipped;
        self.unknown += other.unknown;
        self.short_snap += other.short_snap;
        self.frag_dropped += other.frag_dropped;
    }

    /// Packets that never reached a flow path
    pub fn discarded(&self) -> u64 {
        self.skipped + self.unknown + self.short_snap + self.frag_dropped
    }
}

/// Statistics record emitted on rotation or shutdown
///
/// The interface/kernel drop counts come from the capture backend; the rest
/// from the decoder threads.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatsReport {
    /// Report timestamp
    pub timestamp: DateTime<Utc>,

    /// Frames processed
    pub packets: u64,

    /// Dropped by the capture interface
    pub dropped_by_iface: u64,

    /// Dropped by the kernel
    pub dropped_by_kernel: u64,

    /// Skipped frames
    pub skipped: u64,

    /// Truncated frames
    pub short_snap: u64,

    /// Unknown protocols
    pub unknown: u64,
}

impl StatsReport {
    /// Build a report from merged counters plus backend drop counts
    pub fn new(stat: &ProcStat, dropped_by_iface: u64, dropped_by_kernel: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            packets: stat.packets,
            dropped_by_iface,
            dropped_by_kernel,
            skipped: stat.skipped,
            short_snap: stat.short_snap,
            unknown: stat.unknown,
        }
    }

    /// One-line JSON form for the log sink
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
