//! Core domain types for mdrelay.
//!
//! This crate provides the vocabulary shared by every other component:
//! - `SubscriptionKey`: opaque identifier for a subscribed stream (e.g. "BTCUSDT-1m")
//! - `UpdateEvent`: a sequenced update delivered by the push or pull feed
//! - `Route`, `Severity`, `LogCategory`, `LogEntry`: telemetry and routing enums
//! - `FeedError`: failure type that crosses component seams

pub mod error;
pub mod event;
pub mod key;
pub mod log_entry;
pub mod route;

pub use error::{CoreError, FeedError, FeedResult, Result};
pub use event::UpdateEvent;
pub use key::SubscriptionKey;
pub use log_entry::{LogCategory, LogEntry, Severity};
pub use route::Route;

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by feed traits so they stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
