//! Operational log entries (errors and telemetry).

use crate::key::SubscriptionKey;
use crate::route::Route;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entry severity. Ordered: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component area an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    /// Push transport failures and recoveries.
    Transport,
    /// Pull fetch failures and timeouts.
    Fetch,
    /// Channel lifecycle (backoff, exhaustion).
    Channel,
    /// Cache evictions and rejected writes.
    Cache,
    /// Strategy changes.
    Router,
    /// Caller-facing outcomes.
    Coordinator,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Fetch => "fetch",
            Self::Channel => "channel",
            Self::Cache => "cache",
            Self::Router => "router",
            Self::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single operational event.
///
/// Built by producers, then handed to the event log by value. Fields are
/// private so an entry cannot change once inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    timestamp: DateTime<Utc>,
    category: LogCategory,
    severity: Severity,
    message: String,
    context_key: Option<SubscriptionKey>,
    route: Option<Route>,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(category: LogCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self::at(Utc::now(), category, severity, message)
    }

    /// Create an entry with an explicit timestamp.
    pub fn at(
        timestamp: DateTime<Utc>,
        category: LogCategory,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            category,
            severity,
            message: message.into(),
            context_key: None,
            route: None,
        }
    }

    pub fn with_key(mut self, key: SubscriptionKey) -> Self {
        self.context_key = Some(key);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.route = Some(route);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn category(&self) -> LogCategory {
        self.category
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context_key(&self) -> Option<&SubscriptionKey> {
        self.context_key.as_ref()
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }
}
