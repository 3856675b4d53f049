//! Time source.
//!
//! Session windows and ban dates are clinic-local wall-clock values, so the
//! clock hands out `NaiveDateTime`s. Lease expiry uses epoch milliseconds.

use std::sync::Mutex;

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, Utc};

pub trait Clock: Send + Sync {
    /// Current clinic-local time.
    fn now(&self) -> NaiveDateTime;

    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now_millis(&self) -> i64 {
        self.now().and_utc().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_advances() {
        let start = NaiveDate::from_ymd_opt(2026, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let clock = FixedClock::new(start);
        let before = clock.now_millis();

        clock.advance(Duration::minutes(30));

        assert_eq!(clock.now(), start + Duration::minutes(30));
        assert_eq!(clock.now_millis() - before, 30 * 60 * 1000);
        assert_eq!(clock.today(), start.date());
    }
}
