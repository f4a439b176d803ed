//! Pull feed for mdrelay.
//!
//! One-shot "latest value" fetches used when the push route is degraded and
//! to refresh subscribed keys after a reconnect.

pub mod client;
pub mod error;
pub mod feed;

pub use client::{HttpPullFeed, PullConfig};
pub use error::{PullError, PullResult};
pub use feed::PullFeed;
