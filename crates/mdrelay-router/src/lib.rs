//! Fallback router for mdrelay.
//!
//! Tracks consecutive failures per data route and picks the best available
//! strategy for serving a key:
//! - UsePush: push route healthy
//! - UsePullFallback: push degraded, pull healthy
//! - CachedOnly: both degraded, usable cached value
//! - Offline: nothing usable
//!
//! Success resets a route immediately; failures degrade it only after
//! `failure_threshold` in a row.

pub mod router;

pub use router::{Decision, FailureRecord, FallbackRouter, RouterConfig, Strategy};
