//! # Connection Session State
//!
//! Transport-independent state of one WebSocket transcription session. The
//! WebSocket actor feeds it frames and timer ticks; the session answers with the
//! batches that are due for transcription.
//!
//! ## Session Lifecycle:
//! 1. **Open**: receiving audio and control commands
//! 2. **Closing**: the client closed, timed out, or the transport failed; no more reads
//!    are processed and no more batches are produced while queued work drains
//! 3. **Closed**: the close frame has been sent (or the transport is gone)
//!
//! ## Recording mode:
//! While `Open`, the session is either recording (binary frames go to the batcher) or
//! paused by a `stop` command (binary frames are dropped). `start` resumes recording.
//! Neither command changes the lifecycle state.

use crate::audio::batcher::{AcceptReport, AudioBatch, AudioBatcher};
use crate::error::SessionError;
use serde::Deserialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        }
    }
}

/// Client control command, sent as `{"command": "start"}` or `{"command": "stop"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Start,
    Stop,
}

#[derive(Deserialize)]
struct ControlEnvelope {
    command: ControlCommand,
}

impl ControlCommand {
    /// Parse a client text frame.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        serde_json::from_str::<ControlEnvelope>(text)
            .map(|envelope| envelope.command)
            .map_err(|e| SessionError::MalformedControlMessage(e.to_string()))
    }
}

/// What a binary frame did to the session.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub report: AcceptReport,
    /// A batch that became due with this frame
    pub batch: Option<AudioBatch>,
}

/// Per-connection counters, logged when the session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    pub bytes_received: u64,
    pub frames_dropped_paused: u64,
    pub bytes_discarded: u64,
    pub batches_flushed: u64,
}

/// State machine for one connection.
pub struct ConnectionSession {
    id: Uuid,
    state: SessionState,
    recording: bool,
    batcher: AudioBatcher,
    stats: SessionStats,
    opened_at: Instant,
}

impl ConnectionSession {
    pub fn new(flush_interval: Duration, max_buffer_bytes: usize, now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Open,
            recording: true,
            batcher: AudioBatcher::new(flush_interval, max_buffer_bytes, now),
            stats: SessionStats::default(),
            opened_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    /// Handle one binary frame.
    ///
    /// Frames are ignored unless the session is `Open` and recording.
    pub fn on_binary(&mut self, frame: &[u8], now: Instant) -> FrameOutcome {
        if !self.is_open() {
            return FrameOutcome::default();
        }

        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.len() as u64;

        if !self.recording {
            self.stats.frames_dropped_paused += 1;
            return FrameOutcome::default();
        }

        let report = self.batcher.accept(frame);
        self.stats.bytes_discarded += report.discarded as u64;

        FrameOutcome {
            report,
            batch: self.poll_flush(now),
        }
    }

    /// Timer-driven check: returns a batch once the flush interval has elapsed.
    pub fn poll_flush(&mut self, now: Instant) -> Option<AudioBatch> {
        if !self.is_open() || !self.batcher.should_flush(now) {
            return None;
        }
        self.take_batch(now)
    }

    /// Handle one text frame.
    ///
    /// `stop` pauses recording and returns whatever was buffered so it can be
    /// transcribed right away. Malformed frames leave the session untouched.
    pub fn on_text(
        &mut self,
        text: &str,
        now: Instant,
    ) -> Result<(ControlCommand, Option<AudioBatch>), SessionError> {
        let command = ControlCommand::parse(text)?;
        if !self.is_open() {
            return Ok((command, None));
        }

        let batch = match command {
            ControlCommand::Start => {
                self.recording = true;
                None
            }
            ControlCommand::Stop => {
                self.recording = false;
                self.take_batch(now)
            }
        };
        Ok((command, batch))
    }

    /// Move to `Closing`. Returns false if the session was already closing or closed.
    pub fn begin_closing(&mut self) -> bool {
        if self.state != SessionState::Open {
            return false;
        }
        self.state = SessionState::Closing;
        true
    }

    /// Move to `Closed`. Returns false if it was already closed.
    pub fn mark_closed(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        true
    }

    pub fn buffered_bytes(&self) -> usize {
        self.batcher.buffered_bytes()
    }

    fn take_batch(&mut self, now: Instant) -> Option<AudioBatch> {
        let batch = self.batcher.take_batch(now)?;
        self.stats.batches_flushed += 1;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(3);

    fn session(now: Instant) -> ConnectionSession {
        ConnectionSession::new(INTERVAL, 960_000, now)
    }

    #[test]
    fn test_control_command_parsing() {
        assert_eq!(ControlCommand::parse(r#"{"command":"start"}"#), Ok(ControlCommand::Start));
        assert_eq!(ControlCommand::parse(r#"{"command":"stop"}"#), Ok(ControlCommand::Stop));
        assert!(matches!(
            ControlCommand::parse("not json"),
            Err(SessionError::MalformedControlMessage(_))
        ));
        assert!(ControlCommand::parse(r#"{"command":"rewind"}"#).is_err());
        assert!(ControlCommand::parse(r#"{"cmd":"start"}"#).is_err());
    }

    #[test]
    fn test_sixteen_thousand_bytes_then_silence() {
        let start = Instant::now();
        let mut session = session(start);

        let outcome = session.on_binary(&vec![0u8; 16000], start);
        assert!(outcome.batch.is_none());

        assert!(session.poll_flush(start + Duration::from_millis(1500)).is_none());
        let batch = session.poll_flush(start + Duration::from_millis(3100)).unwrap();
        assert_eq!(batch.len(), 16000);
        assert!(session.poll_flush(start + Duration::from_millis(9000)).is_none());
    }

    #[test]
    fn test_binary_frame_can_complete_batch() {
        let start = Instant::now();
        let mut session = session(start);
        session.on_binary(&[1, 2], start);
        let outcome = session.on_binary(&[3, 4], start + INTERVAL);
        assert_eq!(outcome.batch.unwrap().pcm, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_malformed_text_changes_nothing() {
        let start = Instant::now();
        let mut session = session(start);
        session.on_binary(&[1, 2], start);

        assert!(session.on_text("not json", start).is_err());
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.is_recording());
        assert_eq!(session.buffered_bytes(), 2);
    }

    #[test]
    fn test_stop_flushes_and_pauses() {
        let start = Instant::now();
        let mut session = session(start);
        session.on_binary(&[5, 6, 7, 8], start);

        let (command, batch) = session.on_text(r#"{"command":"stop"}"#, start).unwrap();
        assert_eq!(command, ControlCommand::Stop);
        assert_eq!(batch.unwrap().pcm, vec![5, 6, 7, 8]);
        assert!(!session.is_recording());
        assert_eq!(session.state(), SessionState::Open);

        // paused frames are counted but not buffered
        session.on_binary(&[1, 1], start);
        assert_eq!(session.buffered_bytes(), 0);
        assert_eq!(session.stats().frames_dropped_paused, 1);

        let (_, batch) = session.on_text(r#"{"command":"start"}"#, start).unwrap();
        assert!(batch.is_none());
        session.on_binary(&[2, 2], start);
        assert_eq!(session.buffered_bytes(), 2);
    }

    #[test]
    fn test_stop_with_empty_buffer_dispatches_nothing() {
        let start = Instant::now();
        let mut session = session(start);
        let (_, batch) = session.on_text(r#"{"command":"stop"}"#, start).unwrap();
        assert!(batch.is_none());
        assert_eq!(session.stats().batches_flushed, 0);
    }

    #[test]
    fn test_closing_stops_reads_and_flushes() {
        let start = Instant::now();
        let mut session = session(start);
        session.on_binary(&[1, 2, 3, 4], start);

        assert!(session.begin_closing());
        assert!(!session.begin_closing());
        assert_eq!(session.state(), SessionState::Closing);

        let outcome = session.on_binary(&[9, 9], start + INTERVAL);
        assert!(outcome.batch.is_none());
        assert!(session.poll_flush(start + INTERVAL * 2).is_none());
        assert_eq!(session.stats().frames_received, 1);

        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_stats_track_discards() {
        let start = Instant::now();
        let mut session = ConnectionSession::new(INTERVAL, 4, start);
        let outcome = session.on_binary(&[0u8; 6], start);
        assert_eq!(outcome.report.discarded, 2);
        assert_eq!(session.stats().bytes_discarded, 2);
        assert_eq!(session.stats().bytes_received, 6);
    }
}
