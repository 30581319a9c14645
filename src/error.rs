//! # Error Handling
//!
//! Two error types live here:
//!
//! - **AppError**: failures of plain HTTP handlers, converted to JSON HTTP responses
//!   through actix's `ResponseError` trait.
//! - **SessionError**: failures inside a WebSocket transcription session. These never
//!   become HTTP responses; the session decides per variant whether to report them to
//!   the client, log and continue, or close the connection.
//!
//! ## Session error policy:
//! | Variant                   | Client sees            | Session      |
//! |---------------------------|------------------------|--------------|
//! | `ConfigurationMissing`    | `error` event, close   | terminates   |
//! | `Transport`               | `error` event, close   | terminates   |
//! | `Transcription`           | nothing (batch dropped)| continues    |
//! | `MalformedControlMessage` | nothing (warning)      | continues    |

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the HTTP surface.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **Forbidden**: Request origin is not allowed (403 errors)
/// - **ConfigError**: Configuration problems (500 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::Forbidden("Origin not allowed".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Cross-origin request from an origin outside the allowed list
    Forbidden(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## JSON Response Format:
/// All errors return JSON with a consistent structure:
/// ```json
/// {
///   "error": {
///     "type": "forbidden",
///     "message": "Origin https://evil.example is not allowed",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => {
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::BadRequest(_) => actix_web::http::StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => actix_web::http::StatusCode::FORBIDDEN,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Map each error type to its machine-readable name and message
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg.clone()),
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::Forbidden(msg) => ("forbidden", msg.clone()),
            AppError::ConfigError(msg) => ("config_error", msg.clone()),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,           // Machine-readable error type
                "message": message,           // Human-readable error message
                "timestamp": chrono::Utc::now().to_rfc3339()  // When the error occurred
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error inside a handler, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they map to a 400 rather than a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Failures inside one WebSocket transcription session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The transcription API key is not configured
    ConfigurationMissing(String),

    /// Sending to or receiving from the client failed
    Transport(String),

    /// Uploading, submitting or polling a transcription job failed
    Transcription(String),

    /// A client text frame was not a recognised control command
    MalformedControlMessage(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ConfigurationMissing(msg) => write!(f, "Configuration missing: {}", msg),
            SessionError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SessionError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            SessionError::MalformedControlMessage(msg) => {
                write!(f, "Malformed control message: {}", msg)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Every HTTP failure while talking to the transcription API (connect, timeout,
/// body decode) is a transcription failure for the batch in flight.
impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Transcription(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
