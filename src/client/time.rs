//! Wall-clock timestamps
//!
//! Lease validity and sleep/wake handling are defined against the wall
//! clock, which can jump backwards. `Timestamp` is absolute seconds since
//! the Unix epoch; elapsed-time helpers surface backwards jumps instead of
//! panicking or saturating silently.

use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp(f64);

impl Timestamp {
    pub fn from_secs(secs: f64) -> Timestamp {
        Timestamp(secs)
    }

    /// Current wall-clock time.
    pub fn now() -> Timestamp {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Timestamp(secs)
    }

    pub fn secs(self) -> f64 {
        self.0
    }

    /// Seconds elapsed since `earlier`, or `None` when time went
    /// backwards.
    pub fn seconds_since(self, earlier: Timestamp) -> Option<f64> {
        if self.0 < earlier.0 {
            None
        } else {
            Some(self.0 - earlier.0)
        }
    }

    /// Whether `self` lies at least `margin` seconds after `now`.
    pub fn in_future_by(self, now: Timestamp, margin: f64) -> bool {
        now.0 < self.0 && (self.0 - now.0) >= margin
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, secs: f64) -> Timestamp {
        Timestamp(self.0 + secs)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, d: Duration) -> Timestamp {
        Timestamp(self.0 + d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed() {
        let t0 = Timestamp::from_secs(100.0);
        let t1 = t0 + 42.5;
        assert_eq!(t1.seconds_since(t0), Some(42.5));
    }

    #[test]
    fn test_backwards_time_detected() {
        let t0 = Timestamp::from_secs(100.0);
        let t1 = Timestamp::from_secs(99.0);
        assert_eq!(t1.seconds_since(t0), None);
    }

    #[test]
    fn test_in_future_by() {
        let now = Timestamp::from_secs(1000.0);
        assert!((now + 31.0).in_future_by(now, 30.0));
        assert!(!(now + 29.0).in_future_by(now, 30.0));
        assert!(!Timestamp::from_secs(999.0).in_future_by(now, 30.0));
    }
}
