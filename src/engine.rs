//! Capture engine
//!
//! One engine per ingress session: the capture callback hands every frame to
//! [`Engine::process_packet`], which decodes it, merges it into the flow
//! table and runs the idle sweep at most once per wall-second. The decoder
//! and the flow table are colocated on the capture thread; the writer runs
//! on its own thread behind the output queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

pub use crate::decode::{LinkType, PacketHeader};

use crate::config::EngineConfig;
use crate::decode;
use crate::flow::{self, table::FlowTable};
use crate::output::OutputQueue;
use crate::stats::{ProcStat, StatsReport};

pub struct Engine {
    config: EngineConfig,
    link_type: LinkType,
    table: FlowTable,
    output: OutputQueue,
    stats: ProcStat,
    /// Wall-second of the last idle sweep
    last_sweep: u64,
    shutdown: Arc<AtomicBool>,
    finished: bool,
}

impl Engine {
    pub fn new(config: EngineConfig, link_type: LinkType, output: OutputQueue) -> Self {
        Self {
            config,
            link_type,
            table: FlowTable::new(),
            output,
            stats: ProcStat::default(),
            last_sweep: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            finished: false,
        }
    }

    /// Flag polled by the packet path; setting it drains and finalises
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Ingress callback: decode one captured frame and update flow state
    pub fn process_packet(&mut self, hdr: &PacketHeader, data: &[u8]) {
        if self.shutdown.load(Ordering::Relaxed) {
            self.finish();
            return;
        }

        self.stats.packets += 1;
        if let Some(node) = decode::decode_packet(hdr, data, self.link_type, &mut self.stats) {
            flow::process_node(&mut self.table, &self.output, node);
        }

        if hdr.ts_sec.saturating_sub(self.last_sweep) > 1 {
            self.sweep(hdr.ts_sec);
            self.last_sweep = hdr.ts_sec;
        }
    }

    /// Flush every flow idle longer than the configured timeout
    fn sweep(&mut self, now_sec: u64) {
        let timeout_us = self.config.idle_timeout_secs * 1_000_000;
        let expired = self.table.expire_idle(now_sec * 1_000_000, timeout_us);
        if !expired.is_empty() {
            debug!(count = expired.len(), "idle sweep flushed flows");
        }
        for node in expired {
            flow::flush_node(&self.output, node);
        }
    }

    /// Drain the table, emit the shutdown sentinel and stop accepting packets
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let remaining = self.table.drain();
        info!(flows = remaining.len(), "flushing flow table on shutdown");
        for node in remaining {
            flow::flush_node(&self.output, node);
        }
        if self.output.shutdown().is_err() {
            debug!("output queue already closed");
        }
    }

    /// Snapshot of this thread's counters
    pub fn stats(&self) -> ProcStat {
        self.stats
    }

    /// Flows currently held in the table
    pub fn active_flows(&self) -> usize {
        self.table.len()
    }

    /// Statistics record for rotation or shutdown reporting
    pub fn report(&self, dropped_by_iface: u64, dropped_by_kernel: u64) -> StatsReport {
        StatsReport::new(&self.stats, dropped_by_iface, dropped_by_kernel)
    }
}
