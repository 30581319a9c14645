//! HTTP middleware wrapped around every route, WebSocket upgrades included.

pub mod logging;
pub mod metrics;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
