//! Output queue
//!
//! Bounded multi-producer/single-consumer channel carrying completed flow
//! nodes and fingerprint records to the writer thread. Producers choose
//! between blocking and dropping when the queue is full; the writer accounts
//! for every consumed item so producers can observe drain progress.

pub mod staging;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::Backpressure;
use crate::flow::node::{FlowKey, FlowNode, NodeState};
use crate::ja4::Ja4Record;
use crate::{ProbeError, Result};

/// One item bound for the writer
#[derive(Debug)]
pub enum OutboundItem {
    /// Completed flow, ownership transfers with the item
    Flow(Box<FlowNode>),
    /// Handshake fingerprint keyed by its flow
    Fingerprint { record: Ja4Record, key: FlowKey },
    /// Shutdown sentinel; the writer finalises and exits
    Shutdown,
}

/// Queue counters, shared between producers and the writer
#[derive(Debug, Default)]
pub struct OutputStats {
    pub flows: AtomicU64,
    pub fingerprints: AtomicU64,
    pub dropped: AtomicU64,
    pub consumed: AtomicU64,
}

/// Producer side of the output queue
#[derive(Clone)]
pub struct OutputQueue {
    tx: Sender<OutboundItem>,
    policy: Backpressure,
    stats: Arc<OutputStats>,
}

impl OutputQueue {
    /// Create a queue of the given capacity, returning the consumer end
    pub fn bounded(capacity: usize, policy: Backpressure) -> (Self, Receiver<OutboundItem>) {
        let (tx, rx) = bounded(capacity);
        (
            Self {
                tx,
                policy,
                stats: Arc::new(OutputStats::default()),
            },
            rx,
        )
    }

    /// Hand a completed flow node to the writer
    pub fn push_flow(&self, node: FlowNode) -> Result<()> {
        self.stats.flows.fetch_add(1, Ordering::Relaxed);
        self.push(OutboundItem::Flow(Box::new(node)))
    }

    /// Hand a fingerprint record to the writer
    pub fn push_fingerprint(&self, record: Ja4Record, key: FlowKey) -> Result<()> {
        self.stats.fingerprints.fetch_add(1, Ordering::Relaxed);
        self.push(OutboundItem::Fingerprint { record, key })
    }

    /// Signal the writer to finalise
    pub fn shutdown(&self) -> Result<()> {
        self.tx
            .send(OutboundItem::Shutdown)
            .map_err(|_| ProbeError::QueueClosed)
    }

    fn push(&self, item: OutboundItem) -> Result<()> {
        match self.policy {
            Backpressure::Block => self.tx.send(item).map_err(|_| ProbeError::QueueClosed),
            Backpressure::Drop => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(ProbeError::QueueClosed),
            },
        }
    }

    pub fn stats(&self) -> Arc<OutputStats> {
        Arc::clone(&self.stats)
    }
}

/// Downstream writer of completed flows and fingerprints
///
/// Implementations own the on-disk format; the engine only transfers
/// ownership of the records.
pub trait RecordWriter: Send {
    fn write_flow(&mut self, node: &FlowNode) -> std::io::Result<()>;

    fn write_fingerprint(&mut self, record: &Ja4Record, key: &FlowKey) -> std::io::Result<()>;

    /// Called once after the shutdown sentinel
    fn finalize(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Spawn the writer thread draining the queue into `writer`
///
/// The thread exits on the shutdown sentinel or when every producer is gone.
pub fn spawn_writer<W: RecordWriter + 'static>(
    rx: Receiver<OutboundItem>,
    mut writer: W,
    stats: Arc<OutputStats>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match rx.recv() {
                Ok(OutboundItem::Flow(mut node)) => {
                    if let Err(e) = writer.write_flow(&node) {
                        warn!(error = %e, "flow write failed");
                    }
                    node.state = NodeState::Freed;
                    stats.consumed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(OutboundItem::Fingerprint { record, key }) => {
                    if let Err(e) = writer.write_fingerprint(&record, &key) {
                        warn!(error = %e, "fingerprint write failed");
                    }
                    stats.consumed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(OutboundItem::Shutdown) | Err(_) => break,
            }
        }
        if let Err(e) = writer.finalize() {
            warn!(error = %e, "writer finalise failed");
        }
        debug!("writer thread exited");
    })
}
