//! Multi-frame stream reassembly
//!
//! Protocol decoders that split payloads across several CAN frames park the
//! partial data here. The table is keyed by CAN ID plus a protocol-specific
//! sub-channel, holds at most one in-progress stream per key, and enforces
//! the shared reassembly rules: a new start supersedes any prior stream on
//! the same key, continuations must arrive in cyclic sequence order, chunks
//! are truncated to the declared total length, and stale streams are evicted
//! after a timeout.

use crate::types::HeaderField;
use std::collections::HashMap;

/// Default reassembly timeout: 2 seconds
pub const DEFAULT_STREAM_TIMEOUT_NS: u64 = 2_000_000_000;

/// Identifies one logical reassembly stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// CAN ID the stream arrives on
    pub can_id: u32,
    /// Protocol-specific sub-channel (ECU index, display channel, 0 if unused)
    pub channel: u8,
}

impl StreamKey {
    pub fn new(can_id: u32, channel: u8) -> Self {
        Self { can_id, channel }
    }
}

/// Reassembly parameters, fixed per protocol decoder
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Streams older than this are evicted
    pub timeout_ns: u64,
    /// Sequence numbers wrap at this value; must be nonzero
    pub seq_modulus: u8,
    /// Largest payload a start frame may declare
    pub max_len: usize,
}

impl StreamConfig {
    pub fn new(timeout_ns: u64, seq_modulus: u8, max_len: usize) -> Self {
        Self {
            timeout_ns,
            seq_modulus,
            max_len,
        }
    }
}

/// One in-progress reassembly
#[derive(Debug)]
struct StreamState {
    header: Vec<HeaderField>,
    buffer: Vec<u8>,
    expected_len: usize,
    next_seq: u8,
    started_at_ns: u64,
    frames: usize,
}

impl StreamState {
    /// Append a chunk, truncating to the declared total length
    fn push_chunk(&mut self, chunk: &[u8]) {
        let remaining = self.expected_len - self.buffer.len();
        let take = usize::min(remaining, chunk.len());
        self.buffer.extend_from_slice(&chunk[..take]);
    }

    fn is_complete(&self) -> bool {
        self.buffer.len() >= self.expected_len
    }

    fn into_completed(self, key: StreamKey) -> CompletedStream {
        CompletedStream {
            key,
            header: self.header,
            payload: self.buffer,
            frames: self.frames,
            started_at_ns: self.started_at_ns,
        }
    }
}

/// A fully reassembled stream, ready for application-level decoding
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedStream {
    /// Key the stream was reassembled under
    pub key: StreamKey,
    /// Header fields captured from the start frame
    pub header: Vec<HeaderField>,
    /// Complete payload, exactly the declared length
    pub payload: Vec<u8>,
    /// Number of CAN frames consumed
    pub frames: usize,
    /// Timestamp of the start frame
    pub started_at_ns: u64,
}

/// Result of starting a stream
#[derive(Debug, PartialEq)]
pub enum BeginOutcome {
    /// The start frame already carried the whole payload
    Complete(CompletedStream),
    /// Stream created, waiting for continuations
    Started,
    /// Declared length exceeds the protocol limit, nothing was created
    TooLong { len: usize, max: usize },
}

/// Result of appending a continuation
#[derive(Debug, PartialEq)]
pub enum AppendOutcome {
    /// This chunk completed the stream
    Complete(CompletedStream),
    /// Chunk buffered, more continuations expected
    Accepted,
    /// No in-progress stream for this key
    NotFound,
    /// Wrong sequence number, the stream was dropped
    SequenceMismatch { expected: u8, got: u8 },
}

/// Keyed reassembly table holding all in-progress streams for one decoder
#[derive(Debug)]
pub struct StreamTable {
    config: StreamConfig,
    streams: HashMap<StreamKey, StreamState>,
    timed_out: u64,
}

impl StreamTable {
    /// Create an empty table
    ///
    /// Panics if `config.seq_modulus` is zero.
    pub fn new(config: StreamConfig) -> Self {
        assert!(config.seq_modulus != 0, "sequence modulus must be nonzero");
        Self {
            config,
            streams: HashMap::new(),
            timed_out: 0,
        }
    }

    /// Start a new stream from a start frame
    ///
    /// Any stream already in progress under `key` is discarded: the new start
    /// frame is authoritative. If `chunk` already covers `expected_len` the
    /// stream completes immediately without being stored.
    pub fn begin(
        &mut self,
        key: StreamKey,
        expected_len: usize,
        first_seq: u8,
        header: Vec<HeaderField>,
        chunk: &[u8],
        now_ns: u64,
    ) -> BeginOutcome {
        if expected_len > self.config.max_len {
            return BeginOutcome::TooLong {
                len: expected_len,
                max: self.config.max_len,
            };
        }

        if let Some(old) = self.streams.remove(&key) {
            log::debug!(
                "Stream 0x{:X}/{} superseded by new start with {}/{} bytes buffered",
                key.can_id,
                key.channel,
                old.buffer.len(),
                old.expected_len
            );
        }

        let mut state = StreamState {
            header,
            buffer: Vec::with_capacity(expected_len),
            expected_len,
            next_seq: first_seq,
            started_at_ns: now_ns,
            frames: 1,
        };
        state.push_chunk(chunk);

        if state.is_complete() {
            return BeginOutcome::Complete(state.into_completed(key));
        }

        self.streams.insert(key, state);
        BeginOutcome::Started
    }

    /// Append a continuation chunk to the stream under `key`
    ///
    /// A stale stream found here is evicted first and counted as timed out,
    /// so the continuation of a dead stream reports `NotFound` rather than
    /// extending it. A sequence mismatch drops the stream: the remaining
    /// continuations can no longer produce a coherent payload.
    pub fn append(&mut self, key: StreamKey, seq: u8, chunk: &[u8], now_ns: u64) -> AppendOutcome {
        if let Some(state) = self.streams.get(&key) {
            if now_ns.saturating_sub(state.started_at_ns) > self.config.timeout_ns {
                self.streams.remove(&key);
                self.timed_out += 1;
                log::debug!(
                    "Stream 0x{:X}/{} expired before continuation arrived",
                    key.can_id,
                    key.channel
                );
            }
        }

        let state = match self.streams.get_mut(&key) {
            Some(state) => state,
            None => return AppendOutcome::NotFound,
        };

        if seq != state.next_seq {
            let expected = state.next_seq;
            self.streams.remove(&key);
            return AppendOutcome::SequenceMismatch { expected, got: seq };
        }

        state.next_seq = (((seq as u16) + 1) % (self.config.seq_modulus as u16)) as u8;
        state.frames += 1;
        state.push_chunk(chunk);

        if state.is_complete() {
            match self.streams.remove(&key) {
                Some(done) => AppendOutcome::Complete(done.into_completed(key)),
                None => AppendOutcome::NotFound,
            }
        } else {
            AppendOutcome::Accepted
        }
    }

    /// Evict every stream whose age exceeds the timeout
    ///
    /// Returns the number of streams evicted.
    pub fn sweep(&mut self, now_ns: u64) -> usize {
        let timeout_ns = self.config.timeout_ns;
        let before = self.streams.len();

        self.streams.retain(|key, state| {
            let age_ns = now_ns.saturating_sub(state.started_at_ns);
            if age_ns > timeout_ns {
                log::debug!(
                    "Evicting stream 0x{:X}/{} with {}/{} bytes after {} ms",
                    key.can_id,
                    key.channel,
                    state.buffer.len(),
                    state.expected_len,
                    age_ns / 1_000_000
                );
                false
            } else {
                true
            }
        });

        let evicted = before - self.streams.len();
        self.timed_out += evicted as u64;
        evicted
    }

    /// Number of streams currently in progress
    pub fn active(&self) -> usize {
        self.streams.len()
    }

    /// Total streams evicted by timeout since the last counter reset
    pub fn timed_out(&self) -> u64 {
        self.timed_out
    }

    /// Drop all in-progress streams and zero the timeout counter
    pub fn clear(&mut self) {
        self.streams.clear();
        self.timed_out = 0;
    }

    /// Zero the timeout counter without touching in-progress streams
    pub fn reset_counters(&mut self) {
        self.timed_out = 0;
    }
}
