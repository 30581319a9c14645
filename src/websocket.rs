//! # WebSocket Transcription Endpoint
//!
//! Clients connect to `/ws/transcribe`, stream raw PCM as binary frames and receive
//! transcripts as JSON text frames.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the server answers with `{"type":"ready"}`, or with
//!    `{"type":"error","message":...}` followed by a close frame when no transcription
//!    API key is configured
//! 2. **Audio Streaming**: binary frames carry little-endian 16-bit mono PCM at 16 kHz
//! 3. **Control**: text frames `{"command":"start"}` / `{"command":"stop"}` resume or
//!    pause recording; `stop` also sends whatever is buffered for transcription
//! 4. **Transcription Results**: `{"type":"final","text":...,"confidence":...}`, one per
//!    batch, in audio order
//! 5. **Close**: queued batches finish (bounded by the shutdown grace period), then the
//!    server sends a normal close frame
//!
//! ## Actor Model:
//! Each connection is one `TranscriptionSocket` actor. It owns the
//! [`ConnectionSession`] state machine and a [`TranscriptionWorker`]; worker outcomes
//! come back as a second stream attached to the actor context, so every state change
//! happens on the actor.

use crate::audio::batcher::AudioBatch;
use crate::audio::session::ConnectionSession;
use crate::error::{AppError, AppResult, SessionError};
use crate::state::AppState;
use crate::transcription::{BatchOutcome, DispatchError, TranscriptionWorker};

use actix::prelude::*;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// Events sent to the client as JSON text frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TranscriptEvent {
    /// The session accepts audio
    Ready,

    /// Transcript of one batch
    Final { text: String, confidence: f64 },

    /// The session cannot continue; a close frame follows
    Error { message: String },
}

/// WebSocket actor for one transcription session.
pub struct TranscriptionSocket {
    state: AppState,
    session: ConnectionSession,
    worker: Option<TranscriptionWorker>,
    /// Last time any frame arrived from the client
    last_heartbeat: Instant,
    /// False once our close frame went out or the client side is gone
    transport_open: bool,
}

impl TranscriptionSocket {
    pub fn new(state: AppState) -> Self {
        let now = Instant::now();
        let session = ConnectionSession::new(
            state.config.audio.flush_interval(),
            state.config.audio.max_buffer_bytes,
            now,
        );

        Self {
            state,
            session,
            worker: None,
            last_heartbeat: now,
            transport_open: true,
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &TranscriptEvent) {
        if !self.transport_open {
            debug!(session_id = %self.session.id(), ?event, "Transport closed, event discarded");
            return;
        }
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.session.id(), "Failed to encode event: {}", err),
        }
    }

    /// Report a terminal error to the client (best effort) and close.
    fn fail(&mut self, ctx: &mut ws::WebsocketContext<Self>, err: SessionError) {
        error!(session_id = %self.session.id(), error = %err, "Session failed");
        self.send_event(
            ctx,
            &TranscriptEvent::Error {
                message: err.to_string(),
            },
        );
        self.begin_close(ctx, "session error");
    }

    fn dispatch(&mut self, batch: AudioBatch) {
        let session_id = self.session.id();
        let Some(worker) = &self.worker else {
            return;
        };

        let batch_id = batch.id;
        let bytes = batch.len();
        match worker.dispatch(batch) {
            Ok(()) => {
                debug!(session_id = %session_id, batch_id, bytes, "Batch queued for transcription");
                self.state.record_transcription(|t| t.batches_dispatched += 1);
            }
            Err(DispatchError::QueueFull(batch)) => {
                warn!(
                    session_id = %session_id,
                    batch_id = batch.id,
                    bytes = batch.len(),
                    "Transcription backlog full, dropping batch"
                );
                self.state.record_transcription(|t| t.batches_dropped += 1);
            }
            Err(DispatchError::Closed(batch)) => {
                debug!(session_id = %session_id, batch_id = batch.id, "Worker closed, dropping batch");
                self.state.record_transcription(|t| t.batches_dropped += 1);
            }
        }
    }

    fn handle_binary(&mut self, data: &[u8]) {
        let outcome = self.session.on_binary(data, Instant::now());

        if !self.session.is_recording() {
            debug!(session_id = %self.session.id(), bytes = data.len(), "Recording paused, frame dropped");
        }
        if outcome.report.discarded > 0 {
            warn!(
                session_id = %self.session.id(),
                accepted = outcome.report.accepted,
                discarded = outcome.report.discarded,
                "Audio buffer full, oldest audio discarded"
            );
            let discarded = outcome.report.discarded as u64;
            self.state.record_transcription(|t| t.bytes_discarded += discarded);
        }
        if let Some(batch) = outcome.batch {
            self.dispatch(batch);
        }
    }

    fn handle_text(&mut self, text: &str) {
        match self.session.on_text(text, Instant::now()) {
            Ok((command, batch)) => {
                info!(session_id = %self.session.id(), ?command, "Control command");
                if let Some(batch) = batch {
                    self.dispatch(batch);
                }
            }
            Err(err) => {
                warn!(session_id = %self.session.id(), error = %err, "Ignoring text frame");
            }
        }
    }

    /// Enter `Closing`: no more reads, no more batches; queued work gets the grace
    /// period to finish before the close frame goes out.
    fn begin_close(&mut self, ctx: &mut ws::WebsocketContext<Self>, reason: &str) {
        if !self.session.begin_closing() {
            return;
        }

        info!(
            session_id = %self.session.id(),
            reason,
            unsent_bytes = self.session.buffered_bytes(),
            "Session closing"
        );

        match &mut self.worker {
            Some(worker) => {
                worker.close();
                // the outcome stream ends once the worker drains; this is the fallback
                ctx.run_later(self.state.config.session.shutdown_grace(), |act, ctx| {
                    let drained = act.worker.as_ref().map_or(true, |w| w.is_finished());
                    if !drained {
                        warn!(
                            session_id = %act.session.id(),
                            "Shutdown grace period elapsed with transcriptions pending"
                        );
                    }
                    act.finish_close(ctx);
                });
            }
            None => self.finish_close(ctx),
        }
    }

    fn finish_close(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        self.session.begin_closing();
        if !self.session.mark_closed() {
            return;
        }

        if self.transport_open {
            ctx.close(Some(ws::CloseReason {
                code: ws::CloseCode::Normal,
                description: None,
            }));
            self.transport_open = false;
        }
        ctx.stop();
    }
}

impl Actor for TranscriptionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let session_id = self.session.id();
        self.state.session_opened();
        info!(session_id = %session_id, "WebSocket session started");

        if !self.state.config.has_api_key() {
            self.fail(
                ctx,
                SessionError::ConfigurationMissing(
                    "transcription API key is not configured".to_string(),
                ),
            );
            return;
        }

        let config = &self.state.config;
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        self.worker = Some(TranscriptionWorker::spawn(
            session_id,
            self.state.transcriber.clone(),
            config.audio.wav_format(),
            config.audio.max_pending_batches,
            outcome_tx,
        ));
        ctx.add_stream(UnboundedReceiverStream::new(outcome_rx));

        ctx.run_interval(config.audio.tick_interval(), |act, _ctx| {
            if let Some(batch) = act.session.poll_flush(Instant::now()) {
                act.dispatch(batch);
            }
        });

        let client_timeout = config.session.client_timeout();
        ctx.run_interval(config.session.heartbeat_interval(), move |act, ctx| {
            if !act.session.is_open() {
                return;
            }
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(session_id = %act.session.id(), "Client heartbeat timeout");
                act.begin_close(ctx, "heartbeat timeout");
            } else {
                ctx.ping(b"");
            }
        });

        self.send_event(ctx, &TranscriptEvent::Ready);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.mark_closed();
        self.state.session_closed();

        let stats = self.session.stats();
        info!(
            session_id = %self.session.id(),
            state = self.session.state().as_str(),
            duration_ms = %self.session.age(Instant::now()).as_millis(),
            frames = stats.frames_received,
            bytes = stats.bytes_received,
            batches = stats.batches_flushed,
            paused_frames = stats.frames_dropped_paused,
            discarded_bytes = stats.bytes_discarded,
            "WebSocket session stopped"
        );
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranscriptionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_heartbeat = Instant::now();

        if !self.session.is_open() {
            return;
        }

        match msg {
            Ok(ws::Message::Binary(data)) => self.handle_binary(&data),
            Ok(ws::Message::Text(text)) => self.handle_text(&text),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.session.id(), ?reason, "Client sent close frame");
                self.begin_close(ctx, "client closed");
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id(), "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => self.fail(ctx, SessionError::Transport(err.to_string())),
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // peer is gone; nothing more can be written
        self.transport_open = false;
        self.begin_close(ctx, "transport closed");
    }
}

/// Outcomes from the transcription worker.
impl StreamHandler<BatchOutcome> for TranscriptionSocket {
    fn handle(&mut self, outcome: BatchOutcome, ctx: &mut Self::Context) {
        let session_id = self.session.id();

        match outcome.result {
            Ok(transcript) => {
                self.state.record_transcription(|t| t.batches_transcribed += 1);
                if transcript.text.trim().is_empty() {
                    debug!(session_id = %session_id, batch_id = outcome.batch_id, "Empty transcript");
                    return;
                }
                debug!(
                    session_id = %session_id,
                    batch_id = outcome.batch_id,
                    wav_bytes = outcome.wav_bytes,
                    duration_ms = %outcome.elapsed.as_millis(),
                    "Sending transcript"
                );
                self.send_event(
                    ctx,
                    &TranscriptEvent::Final {
                        text: transcript.text,
                        confidence: transcript.confidence,
                    },
                );
            }
            Err(_) => {
                // already logged by the worker; the client sees nothing for this batch
                self.state.record_transcription(|t| t.batches_failed += 1);
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(session_id = %self.session.id(), "Transcription worker drained");
        self.finish_close(ctx);
    }
}

/// WebSocket endpoint handler.
///
/// Rejects upgrades whose `Origin` is not in the allowed list with 403 before the
/// handshake. Requests without an `Origin` header (non-browser clients) are accepted.
pub async fn transcribe_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    if let Some(origin) = req.headers().get(header::ORIGIN) {
        let origin = origin
            .to_str()
            .map_err(|_| AppError::BadRequest("Origin header is not valid text".to_string()))?;
        if !state.config.cors.allows(origin) {
            warn!(origin, "Rejected WebSocket upgrade from disallowed origin");
            return Err(AppError::Forbidden(format!("Origin {} is not allowed", origin)));
        }
    }

    debug!(
        peer = ?req.connection_info().peer_addr(),
        "WebSocket upgrade requested"
    );

    let frame_size = state.config.audio.max_buffer_bytes;
    let socket = TranscriptionSocket::new(state.get_ref().clone());

    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(frame_size)
        .start()
        .map_err(|err| AppError::BadRequest(format!("WebSocket handshake failed: {}", err)))
}
