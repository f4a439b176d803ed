//! Bounded event log, Prometheus metrics and structured logging for mdrelay.
//!
//! Provides observability without unbounded growth:
//! - `BoundedEventLog`: fixed-capacity, severity-weighted ring of operational events
//! - Prometheus metrics for channel, cache, router and pull activity
//! - Structured JSON logging with tracing

pub mod error;
pub mod event_log;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use event_log::{BoundedEventLog, EventLogConfig, EventLogStats, RecentEvents};
pub use logging::init_logging;
pub use metrics::Metrics;
