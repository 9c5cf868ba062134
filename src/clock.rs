//! Time source used by every expiry, replay-window and key-age decision.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::{error_codes, CryptoError, CryptoResult};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// `at + by`, or an `InvalidInput` when the result leaves chrono's range.
pub fn checked_add(at: DateTime<Utc>, by: Duration) -> CryptoResult<DateTime<Utc>> {
    at.checked_add_signed(by).ok_or_else(|| out_of_range(at, by))
}

/// `at - by`, or an `InvalidInput` when the result leaves chrono's range.
pub fn checked_sub(at: DateTime<Utc>, by: Duration) -> CryptoResult<DateTime<Utc>> {
    at.checked_sub_signed(by).ok_or_else(|| out_of_range(at, by))
}

fn out_of_range(at: DateTime<Utc>, by: Duration) -> CryptoError {
    CryptoError::invalid_input(
        "timestamp",
        &format!("{} shifted by {}s is out of range", at, by.num_seconds()),
        error_codes::INVALID_PARAMETER,
    )
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests to cross validity
/// windows without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::days(31));
        assert_eq!(clock.now() - start, Duration::days(31));
    }

    #[test]
    fn test_checked_shift_reports_overflow() {
        let now = Utc::now();
        assert_eq!(checked_add(now, Duration::days(1)).unwrap() - now, Duration::days(1));
        assert_eq!(now - checked_sub(now, Duration::days(1)).unwrap(), Duration::days(1));

        let err = checked_add(DateTime::<Utc>::MAX_UTC, Duration::days(1)).unwrap_err();
        assert_eq!(err.error_type(), "InvalidInput");
        assert!(checked_sub(DateTime::<Utc>::MIN_UTC, Duration::seconds(1)).is_err());
    }
}
