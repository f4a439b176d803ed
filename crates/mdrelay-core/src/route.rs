//! Data routes used by the fallback router.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical route through which a value can be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Push feed (streaming subscription).
    Push,
    /// Direct pull request.
    Pull,
    /// Serve from cache only.
    CacheOnly,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Push, Route::Pull, Route::CacheOnly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::CacheOnly => "cache_only",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
