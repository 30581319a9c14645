//! # Transcription Worker
//!
//! One worker task per WebSocket session. The session pushes flushed batches into a
//! bounded FIFO queue; the worker frames each batch as WAV, calls the transcriber, and
//! sends a [`BatchOutcome`] back on an unbounded channel the session listens to.
//!
//! ## Guarantees:
//! - Batches of one session are transcribed one at a time, in flush order, so outcomes
//!   arrive in audio order.
//! - The receive loop never waits on transcription: `dispatch` is a non-blocking
//!   `try_send`. A full queue hands the batch back to the caller, which drops it.
//! - Closing the queue lets already-queued batches finish. When the queue is drained the
//!   worker exits and drops its outcome sender, which ends the session's outcome stream.
//! - If the session is gone (outcome receiver dropped) the worker stops taking batches.

use crate::audio::batcher::AudioBatch;
use crate::audio::wav::{frame_pcm, WavFormat};
use crate::error::SessionError;
use crate::transcription::{Transcriber, Transcript};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of transcribing one batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub batch_id: u64,
    pub wav_bytes: usize,
    pub elapsed: Duration,
    pub result: Result<Transcript, SessionError>,
}

/// Why a batch could not be queued. The batch is handed back.
#[derive(Debug)]
pub enum DispatchError {
    QueueFull(AudioBatch),
    Closed(AudioBatch),
}

/// Handle to a session's worker task.
pub struct TranscriptionWorker {
    queue: Option<mpsc::Sender<AudioBatch>>,
    handle: JoinHandle<()>,
}

impl TranscriptionWorker {
    /// Start the worker task.
    ///
    /// `capacity` bounds how many batches may wait behind the one being transcribed.
    pub fn spawn(
        session_id: Uuid,
        transcriber: Arc<dyn Transcriber>,
        format: WavFormat,
        capacity: usize,
        outcomes: mpsc::UnboundedSender<BatchOutcome>,
    ) -> Self {
        let (queue, batches) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(session_id, transcriber, format, batches, outcomes));
        Self {
            queue: Some(queue),
            handle,
        }
    }

    /// Queue a batch without waiting.
    pub fn dispatch(&self, batch: AudioBatch) -> Result<(), DispatchError> {
        let Some(queue) = &self.queue else {
            return Err(DispatchError::Closed(batch));
        };
        queue.try_send(batch).map_err(|err| match err {
            mpsc::error::TrySendError::Full(batch) => DispatchError::QueueFull(batch),
            mpsc::error::TrySendError::Closed(batch) => DispatchError::Closed(batch),
        })
    }

    /// Stop accepting batches. Queued batches are still transcribed.
    pub fn close(&mut self) {
        self.queue.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Close the queue and wait for the worker to drain it.
    #[cfg(test)]
    pub async fn shutdown(mut self) {
        self.close();
        if let Err(err) = self.handle.await {
            warn!("Transcription worker ended abnormally: {}", err);
        }
    }
}

async fn run(
    session_id: Uuid,
    transcriber: Arc<dyn Transcriber>,
    format: WavFormat,
    mut batches: mpsc::Receiver<AudioBatch>,
    outcomes: mpsc::UnboundedSender<BatchOutcome>,
) {
    debug!(session_id = %session_id, "Transcription worker started");

    while let Some(batch) = batches.recv().await {
        let wav = frame_pcm(&batch.pcm, format);
        let wav_bytes = wav.len();
        let started = Instant::now();

        debug!(
            session_id = %session_id,
            batch_id = batch.id,
            wav_bytes,
            "Transcribing batch"
        );

        let result = transcriber.transcribe(wav).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(transcript) => info!(
                session_id = %session_id,
                batch_id = batch.id,
                chars = transcript.text.len(),
                duration_ms = %elapsed.as_millis(),
                "Batch transcribed"
            ),
            Err(err) => warn!(
                session_id = %session_id,
                batch_id = batch.id,
                duration_ms = %elapsed.as_millis(),
                error = %err,
                "Batch transcription failed, dropping batch"
            ),
        }

        let outcome = BatchOutcome {
            batch_id: batch.id,
            wav_bytes,
            elapsed,
            result,
        };
        if outcomes.send(outcome).is_err() {
            debug!(session_id = %session_id, "Session gone, discarding remaining batches");
            break;
        }
    }

    debug!(session_id = %session_id, "Transcription worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{declared_data_len, WAV_HEADER_LEN};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Records every WAV it receives; fails on request.
    #[derive(Default)]
    struct RecordingTranscriber {
        calls: Mutex<Vec<Vec<u8>>>,
        fail_calls: Vec<usize>,
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn transcribe(&self, wav: Vec<u8>) -> Result<Transcript, SessionError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(wav);
                calls.len()
            };
            if self.fail_calls.contains(&call) {
                return Err(SessionError::Transcription("service unavailable".into()));
            }
            Ok(Transcript {
                text: format!("call {}", call),
                confidence: 0.9,
            })
        }
    }

    /// Blocks until released, to keep the queue full.
    struct GatedTranscriber {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Transcriber for GatedTranscriber {
        async fn transcribe(&self, _wav: Vec<u8>) -> Result<Transcript, SessionError> {
            self.gate.notified().await;
            Ok(Transcript {
                text: "late".into(),
                confidence: 1.0,
            })
        }
    }

    fn batch(id: u64, len: usize) -> AudioBatch {
        AudioBatch {
            id,
            pcm: vec![id as u8; len],
        }
    }

    #[tokio::test]
    async fn test_frames_batch_as_wav() {
        let transcriber = Arc::new(RecordingTranscriber::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = TranscriptionWorker::spawn(
            Uuid::new_v4(),
            transcriber.clone(),
            WavFormat::PCM_16K_MONO,
            4,
            tx,
        );

        worker.dispatch(batch(1, 16000)).unwrap();
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.batch_id, 1);
        assert_eq!(outcome.wav_bytes, 16044);

        let calls = transcriber.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 16000 + WAV_HEADER_LEN);
        assert_eq!(declared_data_len(&calls[0]), Some(16000));
    }

    #[tokio::test]
    async fn test_outcomes_in_fifo_order_and_failures_do_not_stop_worker() {
        let transcriber = Arc::new(RecordingTranscriber {
            fail_calls: vec![2],
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = TranscriptionWorker::spawn(
            Uuid::new_v4(),
            transcriber.clone(),
            WavFormat::PCM_16K_MONO,
            4,
            tx,
        );

        for id in 1..=3 {
            worker.dispatch(batch(id, 32)).unwrap();
        }
        worker.shutdown().await;

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        let ids: Vec<u64> = outcomes.iter().map(|o| o.batch_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(SessionError::Transcription(_))));
        assert_eq!(outcomes[2].result.as_ref().unwrap().text, "call 3");
    }

    #[tokio::test]
    async fn test_full_queue_hands_batch_back() {
        let gate = Arc::new(Notify::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = TranscriptionWorker::spawn(
            Uuid::new_v4(),
            Arc::new(GatedTranscriber { gate: gate.clone() }),
            WavFormat::PCM_16K_MONO,
            1,
            tx,
        );

        worker.dispatch(batch(1, 2)).unwrap();
        // let the worker pick up batch 1 so the queue slot is free again
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker.dispatch(batch(2, 2)).unwrap();

        match worker.dispatch(batch(3, 2)) {
            Err(DispatchError::QueueFull(returned)) => assert_eq!(returned.id, 3),
            other => panic!("expected a full queue, got {:?}", other),
        }

        gate.notify_one();
        assert_eq!(rx.recv().await.unwrap().batch_id, 1);
        gate.notify_one();
        assert_eq!(rx.recv().await.unwrap().batch_id, 2);
    }

    #[tokio::test]
    async fn test_closed_worker_rejects_batches() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = TranscriptionWorker::spawn(
            Uuid::new_v4(),
            Arc::new(RecordingTranscriber::default()),
            WavFormat::PCM_16K_MONO,
            2,
            tx,
        );

        worker.close();
        assert!(matches!(worker.dispatch(batch(1, 2)), Err(DispatchError::Closed(_))));

        // the outcome stream ends once the worker has drained
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_worker_stops_when_session_is_gone() {
        let transcriber = Arc::new(RecordingTranscriber::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = TranscriptionWorker::spawn(
            Uuid::new_v4(),
            transcriber.clone(),
            WavFormat::PCM_16K_MONO,
            4,
            tx,
        );
        drop(rx);

        worker.dispatch(batch(1, 2)).unwrap();
        worker.dispatch(batch(2, 2)).unwrap();
        worker.shutdown().await;

        // the first outcome could not be delivered, so batch 2 was never sent out
        assert_eq!(transcriber.calls.lock().unwrap().len(), 1);
    }
}
