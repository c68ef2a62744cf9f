//! Bounded asynchronous decode worker
//!
//! Wraps a [`DecoderRegistry`] in a dedicated thread behind a bounded frame
//! queue. Live capture must never block on decoding, so when the queue is
//! full the newest frame is dropped and counted rather than applying
//! backpressure to the feeder. While the queue is idle the worker
//! periodically sweeps expired reassembly streams; the sweep clock is the
//! highest frame timestamp seen, advanced by observed wall-clock idle time
//! so streams still expire when the bus goes quiet.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::registry::DecoderRegistry;
use crate::types::{CanFrame, DecodedMessage, DecoderError, DecoderStats, ProtocolId, Result};

/// Default frame queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 25_000;

/// Idle interval between stream sweeps
const SWEEP_INTERVAL_MS: u64 = 250;

/// Handle to a running decode worker thread
///
/// Created with [`DecodeWorker::spawn`]; dropped or shut down explicitly via
/// [`DecodeWorker::shutdown`], which drains the queue and returns the final
/// per-decoder counters.
pub struct DecodeWorker {
    tx: Option<SyncSender<CanFrame>>,
    handle: Option<JoinHandle<Vec<(ProtocolId, DecoderStats)>>>,
    dropped: Arc<AtomicU64>,
    paused: Arc<AtomicBool>,
}

impl DecodeWorker {
    /// Start a worker thread around a registry
    ///
    /// # Arguments
    /// * `registry` - Decoder registry the worker takes ownership of
    /// * `capacity` - Bounded queue size ([`DEFAULT_QUEUE_CAPACITY`] is a
    ///   reasonable choice for live capture)
    /// * `sink` - Called on the worker thread for every decoded message
    pub fn spawn<F>(registry: DecoderRegistry, capacity: usize, sink: F) -> Self
    where
        F: FnMut(DecodedMessage) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let handle = thread::spawn(move || worker_loop(registry, rx, sink));

        Self {
            tx: Some(tx),
            handle: Some(handle),
            dropped: Arc::new(AtomicU64::new(0)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Offer one frame to the worker
    ///
    /// Returns `Ok(true)` if the frame was queued. `Ok(false)` means the
    /// frame was not taken: either the worker is paused (not counted) or the
    /// queue was full (counted in [`dropped`](Self::dropped)).
    pub fn feed(&self, frame: CanFrame) -> Result<bool> {
        if self.paused.load(Ordering::Relaxed) {
            return Ok(false);
        }

        let tx = self.tx.as_ref().ok_or(DecoderError::WorkerStopped)?;
        match tx.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total == 1 || total % 1000 == 0 {
                    log::warn!("Decode queue full, {} frames dropped so far", total);
                }
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(DecoderError::WorkerStopped),
        }
    }

    /// Frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting frames until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Accept frames again
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Whether the worker is currently rejecting frames
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Close the queue, drain it, and return the final per-decoder counters
    pub fn shutdown(mut self) -> Vec<(ProtocolId, DecoderStats)> {
        self.tx.take();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_default(),
            None => Vec::new(),
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop<F>(
    mut registry: DecoderRegistry,
    rx: Receiver<CanFrame>,
    mut sink: F,
) -> Vec<(ProtocolId, DecoderStats)>
where
    F: FnMut(DecodedMessage),
{
    // highest frame timestamp seen; sweeps use this clock, not wall time
    let mut clock_ns: u64 = 0;
    let mut last_frame = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(SWEEP_INTERVAL_MS)) {
            Ok(frame) => {
                clock_ns = clock_ns.max(frame.timestamp_ns);
                last_frame = Instant::now();
                for message in registry.dispatch(&frame) {
                    sink(message);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let idle_ns = last_frame.elapsed().as_nanos() as u64;
                let evicted = registry.sweep(clock_ns.saturating_add(idle_ns));
                if evicted > 0 {
                    log::debug!("Swept {} expired streams while idle", evicted);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    registry.stats()
}
