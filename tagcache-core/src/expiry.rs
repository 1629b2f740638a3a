//! Expiration and compare-and-swap tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long a record lives in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Expiry {
    /// Never expires
    #[default]
    Never,
    /// Expires after the given duration
    After(Duration),
}

impl Expiry {
    /// Convert a ttl in seconds. Zero means "never expires".
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Never
        } else {
            Self::After(Duration::from_secs(secs))
        }
    }

    /// Absolute deadline relative to `now`, or `None` for records that never expire.
    pub fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Never => None,
            Self::After(ttl) => chrono::Duration::from_std(*ttl)
                .ok()
                .and_then(|d| now.checked_add_signed(d)),
        }
    }
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Self::Never
        } else {
            Self::After(ttl)
        }
    }
}

/// Opaque version stamp handed out by token-aware reads and checked by `cas`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CasToken(u64);

impl CasToken {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn version(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_ttl_never_expires() {
        assert_eq!(Expiry::from_secs(0), Expiry::Never);
        assert_eq!(Expiry::from(Duration::ZERO), Expiry::Never);
        assert_eq!(Expiry::Never.deadline(Utc::now()), None);
    }

    #[test]
    fn test_deadline_is_in_the_future() {
        let now = Utc::now();
        let deadline = Expiry::from_secs(60)
            .deadline(now)
            .expect("deadline should exist");
        assert_eq!((deadline - now).num_seconds(), 60);
    }

    #[test]
    fn test_cas_tokens_order_by_version() {
        assert!(CasToken::new(1) < CasToken::new(2));
        assert_eq!(CasToken::new(7).version(), 7);
    }
}
