//! # Audio Module
//!
//! Everything that touches the raw audio stream before it leaves the process.
//!
//! ## Key Components:
//! - **WAV Framer** (`wav`): wraps PCM bytes in a 44-byte RIFF/WAVE header
//! - **Audio Batcher** (`batcher`): time-driven accumulation of binary frames
//! - **Connection Session** (`session`): per-connection state machine and control commands
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod batcher;      // Time-driven PCM accumulation
pub mod session;      // Connection state machine
pub mod wav;          // WAV container framing
