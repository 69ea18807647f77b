//! Double-buffered output staging
//!
//! The writer appends into the active buffer; `rotate` swaps it with the
//! alternate buffer at a wall-clock boundary and the drain thread flushes
//! the alternate to the sink. Nothing written after the swap lands in the
//! pre-boundary output, and nothing written before it lands after.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

struct Buffers {
    active: BytesMut,
    alternate: BytesMut,
    /// Close time recorded for the buffer currently in `alternate`
    close_time: u64,
}

/// Staging area shared between the writer and the drain thread
pub struct StagingBuffer {
    buffers: Mutex<Buffers>,
    cond: Condvar,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Buffers {
                active: BytesMut::with_capacity(capacity),
                alternate: BytesMut::with_capacity(capacity),
                close_time: 0,
            }),
            cond: Condvar::new(),
        })
    }

    /// Append bytes to the active buffer
    pub fn append(&self, data: &[u8]) {
        let mut buffers = self.buffers.lock();
        buffers.active.extend_from_slice(data);
    }

    /// Bytes pending in the active buffer
    pub fn pending(&self) -> usize {
        self.buffers.lock().active.len()
    }

    /// Swap buffers at the boundary `close_time`
    ///
    /// Waits until the previous alternate content is drained, then swaps,
    /// records the close time and wakes the drain thread.
    pub fn rotate(&self, close_time: u64, live: bool) {
        let mut buffers = self.buffers.lock();
        while !buffers.alternate.is_empty() {
            self.cond.wait(&mut buffers);
        }
        {
            let buffers = &mut *buffers;
            std::mem::swap(&mut buffers.active, &mut buffers.alternate);
            buffers.close_time = close_time;
        }
        drop(buffers);
        self.cond.notify_all();

        if live {
            info!(close_time, "staging buffer rotated");
        }
    }

    /// Close time recorded by the last rotation
    pub fn close_time(&self) -> u64 {
        self.buffers.lock().close_time
    }

    /// Wait for rotated content and write it to `sink`
    ///
    /// Returns the number of bytes drained; zero when woken without content
    /// (shutdown polling).
    pub fn drain_into<W: Write>(&self, sink: &mut W, wait: Duration) -> std::io::Result<usize> {
        let chunk = {
            let mut buffers = self.buffers.lock();
            if buffers.alternate.is_empty() {
                let _ = self.cond.wait_for(&mut buffers, wait);
            }
            if buffers.alternate.is_empty() {
                return Ok(0);
            }
            buffers.alternate.split()
        };
        sink.write_all(&chunk)?;
        self.cond.notify_all();
        Ok(chunk.len())
    }
}

/// Spawn the drain thread flushing rotated buffers into `sink`
pub fn spawn_drain<W: Write + Send + 'static>(
    staging: Arc<StagingBuffer>,
    mut sink: W,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = staging.drain_into(&mut sink, Duration::from_millis(100)) {
                warn!(error = %e, "staging drain failed");
            }
        }
        // flush whatever rotation left behind
        if let Err(e) = staging.drain_into(&mut sink, Duration::from_millis(0)) {
            warn!(error = %e, "final staging drain failed");
        }
    })
}
