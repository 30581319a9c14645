//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every WebSocket session.
//!
//! ## What is shared:
//! - **config**: `Arc<AppConfig>`, loaded once at startup and never changed
//! - **transcriber**: `Arc<dyn Transcriber>`, one HTTP client reused by all sessions
//! - **metrics**: `Arc<RwLock<AppMetrics>>`, counters updated by middleware and sessions
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers and session actors hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time
//!
//! Lock poisoning only happens if a thread panicked while holding the lock. The
//! counters stay meaningful in that case, so the poisoned guard is used as-is.

use crate::config::AppConfig;
use crate::transcription::Transcriber;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: Cloning copies three `Arc` pointers, not the data behind them
/// - **dyn Transcriber**: Trait object, so tests can swap in a scripted transcriber
#[derive(Clone)]
pub struct AppState {
    /// Immutable application configuration
    pub config: Arc<AppConfig>,

    /// Client for the cloud transcription API
    pub transcriber: Arc<dyn Transcriber>,

    /// Counters updated by every request and every session
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no Arc<RwLock> needed)
    pub start_time: Instant,
}

/// Counters collected across all requests and sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Current number of open WebSocket sessions
    pub active_sessions: u32,

    /// Sessions accepted since server start
    pub total_sessions: u64,

    /// Transcription pipeline counters
    pub transcription: TranscriptionMetrics,

    /// Detailed metrics for each API endpoint
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// What happened to flushed batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptionMetrics {
    /// Batches handed to a session's worker queue
    pub batches_dispatched: u64,
    /// Batches that produced a transcript
    pub batches_transcribed: u64,
    /// Batches whose transcription failed
    pub batches_failed: u64,
    /// Batches dropped because the worker queue was full or closed
    pub batches_dropped: u64,
    /// Audio bytes discarded by the per-session buffer cap
    pub bytes_discarded: u64,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration and transcriber.
    pub fn new(config: AppConfig, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            config: Arc::new(config),
            transcriber,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first time we see an endpoint, a new EndpointMetric is created with
    /// default values.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a WebSocket session starts.
    pub fn session_opened(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
    }

    /// Called when a WebSocket session ends. Never goes below zero.
    pub fn session_closed(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Update the transcription counters in one lock acquisition.
    pub fn record_transcription<F>(&self, update: F)
    where
        F: FnOnce(&mut TranscriptionMetrics),
    {
        update(&mut self.write_metrics().transcription);
    }

    /// Get a snapshot of current metrics.
    ///
    /// Clones the data so no lock is held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint, 0.0 before the first request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
