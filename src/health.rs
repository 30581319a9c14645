use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Plain status query: `{"status": "running", "timestamp": "<RFC 3339 UTC>"}`.
pub async fn status(_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;

    let status = if config.has_api_key() { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "voice-relay-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "transcription": {
            "api_key_configured": config.has_api_key(),
            "language_code": config.transcription.language_code,
            "flush_interval_ms": config.audio.flush_interval_ms
        },
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.total_sessions
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let transcription = metrics.transcription;

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions,
            "total_sessions": metrics.total_sessions
        },
        "transcription": {
            "batches_dispatched": transcription.batches_dispatched,
            "batches_transcribed": transcription.batches_transcribed,
            "batches_failed": transcription.batches_failed,
            "batches_dropped": transcription.batches_dropped,
            "bytes_discarded": transcription.bytes_discarded
        },
        "endpoints": endpoint_stats,
        "limits": {
            "max_buffer_bytes": state.config.audio.max_buffer_bytes,
            "max_pending_batches": state.config.audio.max_pending_batches
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::error::SessionError;
    use crate::transcription::{Transcriber, Transcript};
    use actix_web::{test, App};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NoopTranscriber;

    #[async_trait]
    impl Transcriber for NoopTranscriber {
        async fn transcribe(&self, _wav: Vec<u8>) -> Result<Transcript, SessionError> {
            Err(SessionError::Transcription("noop".into()))
        }
    }

    fn state(api_key: Option<&str>) -> AppState {
        let mut config = AppConfig::default();
        config.cors.allowed_origins = vec!["http://localhost:3000".into()];
        config.transcription.api_key = api_key.map(str::to_string);
        AppState::new(config, Arc::new(NoopTranscriber))
    }

    #[actix_web::test]
    async fn test_status_shape() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(Some("key"))))
                .route("/", web::get().to(status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "running");
        let timestamp = body["timestamp"].as_str().unwrap();
        let parsed = chrono::DateTime::parse_from_rfc3339(timestamp).unwrap();
        assert_eq!(parsed.offset().local_minus_utc(), 0);
        assert_eq!(body.as_object().unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn test_health_reports_missing_key() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(None)))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["transcription"]["api_key_configured"], false);
        assert_eq!(body["sessions"]["active"], 0);
    }

    #[actix_web::test]
    async fn test_metrics_include_transcription_counters() {
        let state = state(Some("key"));
        state.record_transcription(|t| t.batches_dropped += 3);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["transcription"]["batches_dropped"], 3);
        assert_eq!(body["limits"]["max_pending_batches"], 4);
    }
}
