//! # Audio Batching
//!
//! Accumulates binary PCM frames from one WebSocket connection and decides, by
//! wall-clock interval, when the accumulated audio should be handed off for
//! transcription.
//!
//! ## Policy:
//! - **Time-driven**: a batch is ready once `flush_interval` has elapsed since the last
//!   flush (or since construction) and at least one byte is buffered. Buffer size never
//!   triggers a flush by itself.
//! - **No empty batches**: an empty buffer never reports ready.
//! - **Bounded**: at most `max_bytes` are held. Appending past the cap discards the
//!   oldest audio, keeping whole 2-byte samples, so the newest speech survives.
//!
//! ## Ownership:
//! The batcher is owned by exactly one session actor, so `accept` and `flush` can never
//! interleave. `flush` swaps the buffer out with `std::mem::take`, leaving an empty one.

use std::time::{Duration, Instant};

/// One flushed unit of audio, numbered per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBatch {
    /// Sequence number within the session, starting at 1
    pub id: u64,
    /// Raw little-endian PCM bytes, in arrival order
    pub pcm: Vec<u8>,
}

impl AudioBatch {
    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// Result of appending one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcceptReport {
    pub accepted: usize,
    /// Bytes discarded from the front of the buffer to stay under the cap
    pub discarded: usize,
}

/// Time-driven PCM accumulator.
pub struct AudioBatcher {
    buffer: Vec<u8>,
    flush_interval: Duration,
    max_bytes: usize,
    last_flush: Instant,
    next_batch_id: u64,
}

impl AudioBatcher {
    /// Create a batcher whose interval clock starts at `now`.
    pub fn new(flush_interval: Duration, max_bytes: usize, now: Instant) -> Self {
        Self {
            buffer: Vec::new(),
            flush_interval,
            max_bytes,
            last_flush: now,
            next_batch_id: 1,
        }
    }

    /// Append one frame to the buffer.
    pub fn accept(&mut self, frame: &[u8]) -> AcceptReport {
        self.buffer.extend_from_slice(frame);

        let mut discarded = 0;
        if self.buffer.len() > self.max_bytes {
            discarded = self.buffer.len() - self.max_bytes;
            // keep sample alignment
            if discarded % 2 != 0 && discarded < self.buffer.len() {
                discarded += 1;
            }
            self.buffer.drain(..discarded);
        }

        AcceptReport {
            accepted: frame.len(),
            discarded,
        }
    }

    /// True when the interval has elapsed and there is something to send.
    pub fn should_flush(&self, now: Instant) -> bool {
        !self.buffer.is_empty() && now.saturating_duration_since(self.last_flush) >= self.flush_interval
    }

    /// Take everything buffered and restart the interval clock.
    ///
    /// Returns an empty vector when nothing was buffered.
    pub fn flush(&mut self, now: Instant) -> Vec<u8> {
        self.last_flush = now;
        std::mem::take(&mut self.buffer)
    }

    /// Flush into a numbered batch, or `None` if the buffer is empty.
    pub fn take_batch(&mut self, now: Instant) -> Option<AudioBatch> {
        let pcm = self.flush(now);
        if pcm.is_empty() {
            return None;
        }
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        Some(AudioBatch { id, pcm })
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}
