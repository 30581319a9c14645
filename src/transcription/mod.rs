//! # Transcription Module
//!
//! Speech-to-text is delegated to a cloud service. This module holds the seam the
//! rest of the service talks to and the pieces behind it.
//!
//! ## Key Components:
//! - **Transcriber**: async trait, `transcribe(wav) -> Transcript`
//! - **CloudTranscriber**: uploads a WAV blob, submits a job, polls until it completes
//! - **TranscriptionWorker**: per-session FIFO queue that feeds batches to a transcriber
//!   one at a time and reports each outcome back to the session

pub mod cloud;       // Upload + poll client for the cloud API
pub mod worker;      // Per-session FIFO transcription worker

pub use cloud::CloudTranscriber;
pub use worker::{BatchOutcome, DispatchError, TranscriptionWorker};

use crate::error::SessionError;
use async_trait::async_trait;
use serde::Serialize;

/// Text produced for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    pub text: String,
    /// Service-reported confidence, 0.0 to 1.0
    pub confidence: f64,
}

/// Anything that can turn a WAV file into text.
///
/// Implementations may take arbitrarily long. A failure means "no text for this
/// batch"; callers log it and move on.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<Transcript, SessionError>;
}
