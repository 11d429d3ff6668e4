//! Expiry Module
//!
//! Maximum age of an entry, measured from its last write.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{CacheError, Result};

// == Expiry ==
/// Time-to-live of cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Expiry(Duration);

impl Expiry {
    pub fn from_secs(secs: u64) -> Self {
        Expiry(Duration::from_secs(secs))
    }

    /// Fractional seconds; negative, NaN, and infinite values are rejected.
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        Duration::try_from_secs_f64(secs)
            .map(Expiry)
            .map_err(|e| CacheError::InvalidArguments(format!("invalid expiry {secs}: {e}")))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    // == Is Expired ==
    /// Checks whether an entry last written at `modified` has expired by `now`.
    ///
    /// Boundary condition: the entry expires once `modified + expiry` is
    /// strictly earlier than `now`. An expiry too large to represent never
    /// expires.
    pub fn is_expired_at(&self, modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        TimeDelta::from_std(self.0)
            .ok()
            .and_then(|ttl| modified.checked_add_signed(ttl))
            .is_some_and(|deadline| deadline < now)
    }

    /// Checks a filesystem modification time against the current time.
    pub fn is_expired(&self, modified: SystemTime) -> bool {
        self.is_expired_at(DateTime::<Utc>::from(modified), Utc::now())
    }
}

impl From<Duration> for Expiry {
    fn from(duration: Duration) -> Self {
        Expiry(duration)
    }
}

impl TryFrom<TimeDelta> for Expiry {
    type Error = CacheError;

    fn try_from(delta: TimeDelta) -> Result<Self> {
        delta
            .to_std()
            .map(Expiry)
            .map_err(|_| CacheError::InvalidArguments(format!("negative expiry {delta}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_agree() {
        let from_secs = Expiry::from_secs(90);
        assert_eq!(Expiry::from(Duration::from_secs(90)), from_secs);
        assert_eq!(Expiry::from_secs_f64(90.0).unwrap(), from_secs);
        assert_eq!(Expiry::try_from(TimeDelta::seconds(90)).unwrap(), from_secs);
    }

    #[test]
    fn test_invalid_expiry_rejected() {
        assert!(Expiry::from_secs_f64(-1.0).is_err());
        assert!(Expiry::from_secs_f64(f64::NAN).is_err());
        assert!(Expiry::try_from(TimeDelta::seconds(-5)).is_err());
    }

    #[test]
    fn test_expiry_boundary() {
        let expiry = Expiry::from_secs(10);
        let written = Utc::now();
        assert!(!expiry.is_expired_at(written, written + TimeDelta::seconds(5)));
        // Exactly at the deadline the entry is still fresh
        assert!(!expiry.is_expired_at(written, written + TimeDelta::seconds(10)));
        assert!(expiry.is_expired_at(written, written + TimeDelta::milliseconds(10_001)));
    }

    #[test]
    fn test_huge_expiry_never_expires() {
        let expiry = Expiry::from(Duration::from_secs(u64::MAX));
        assert!(!expiry.is_expired(SystemTime::UNIX_EPOCH));
    }
}
