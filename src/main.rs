//! # Voice Relay Backend - Main Application Entry Point
//!
//! WebSocket service that turns a live PCM stream into transcripts. Audio arrives on
//! `/ws/transcribe`, is batched every few seconds, wrapped as WAV, sent to a cloud
//! transcription API, and the text is pushed back to the same socket.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (defaults, TOML file, environment variables)
//! - **state**: Shared application state and metrics
//! - **health**: Status, health and metrics endpoints
//! - **middleware**: Request logging and metrics collection
//! - **audio**: WAV framing, batching and the per-connection state machine
//! - **transcription**: Cloud transcription client and the per-session worker
//! - **websocket**: The WebSocket actor and upgrade handler
//! - **error**: Error types and HTTP error responses

mod audio;         // PCM batching, WAV framing, session state machine
mod config;        // Configuration management (config.rs)
mod error;         // Error handling types (error.rs)
mod health;        // Status and health endpoints (health.rs)
mod middleware;    // Custom middleware (middleware/ directory)
mod state;         // Application state management (state.rs)
mod transcription; // Cloud transcription client and worker
mod websocket;     // WebSocket transcription endpoint

use crate::config::{AppConfig, CorsConfig};
use crate::state::AppState;
use crate::transcription::CloudTranscriber;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables, failing fast on
///    invalid values (an empty allowed-origin list included)
/// 2. **Sets up logging**
/// 3. **Creates shared application state** with one transcription client for all sessions
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        "Allowed origins: {}",
        config.cors.allowed_origins.join(", ")
    );
    if !config.has_api_key() {
        warn!("Transcription API key is not set; every session will be rejected");
    }

    let transcriber = Arc::new(CloudTranscriber::new(&config.transcription)?);
    let app_state = AppState::new(config.clone(), transcriber);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let cors_config = config.cors.clone();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Add middleware in order (they execute in reverse order for responses)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            // The upgrade handler does its own origin check so a bad origin gets a 403
            .route(
                "/ws/transcribe",
                web::get().to(websocket::transcribe_websocket),
            )
            .service(
                web::scope("")
                    .wrap(build_cors(&cors_config))
                    .route("/", web::get().to(health::status))
                    .route("/health", web::get().to(health::health_check))
                    .service(
                        web::scope("/api/v1")
                            .route("/health", web::get().to(health::health_check))
                            .route("/metrics", web::get().to(health::detailed_metrics)),
                    ),
            )
    })
    .shutdown_timeout(config.server.shutdown_timeout_secs)
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handler failed, stopping server: {}", e),
            }
            // open sessions get the shutdown timeout to drain
            let stop = server_handle.stop(true);
            let limit = Duration::from_secs(config.server.shutdown_timeout_secs + 1);
            if tokio::time::timeout(limit, stop).await.is_err() {
                warn!("Server did not stop within {:?}", limit);
            }
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "voice_relay_backend=trace")
/// - If not set, defaults to "voice_relay_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// CORS policy for the plain HTTP routes, built from the allowed-origin list.
fn build_cors(cors: &CorsConfig) -> Cors {
    let base = if cors.allows_any() {
        Cors::default().allow_any_origin()
    } else {
        cors.allowed_origins
            .iter()
            .fold(Cors::default(), |c, origin| {
                c.allowed_origin(origin.trim_end_matches('/'))
            })
    };

    base.allowed_methods(vec!["GET"])
        .allow_any_header()
        .max_age(3600)
}

/// Resolve when SIGTERM or SIGINT (Ctrl+C) arrives, returning the signal name.
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::header, test};

    #[actix_web::test]
    async fn test_cors_allows_listed_origin_only() {
        let cors = CorsConfig {
            allowed_origins: vec!["http://localhost:3000/".into()],
        };
        let app = test::init_service(
            App::new().service(
                web::scope("")
                    .wrap(build_cors(&cors))
                    .route("/", web::get().to(actix_web::HttpResponse::Ok)),
            ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );

        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((header::ORIGIN, "https://evil.example"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}
