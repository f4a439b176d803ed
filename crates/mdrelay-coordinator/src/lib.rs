//! mdrelay coordinator.
//!
//! Caller-facing market-data service built from the mdrelay components:
//! - Freshness cache with coalesced fetches
//! - Push subscription channel with supervised reconnects
//! - Pull fallback feed
//! - Fallback router (push -> pull -> cached -> offline)
//! - Bounded event log for post-incident review

pub mod config;
pub mod coordinator;
pub mod error;
pub mod subscribers;

pub use config::{AppConfig, CoordinatorConfig, PushConfig, TelemetryConfig};
pub use coordinator::{
    Coordinator, CoordinatorStats, Notification, RequestOutcome, ServiceStatus, Source,
};
pub use error::{AppError, AppResult};
pub use subscribers::{Callback, SubscriberId};
