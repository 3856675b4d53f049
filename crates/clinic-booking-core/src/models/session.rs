//! Clinic session models.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Fixed clinic periods within a day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// 09:00 - 12:00
    Morning,
    /// 14:00 - 17:00
    Afternoon,
    /// 18:00 - 21:00
    Evening,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
            Period::Evening => "evening",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(Period::Morning),
            "afternoon" => Some(Period::Afternoon),
            "evening" => Some(Period::Evening),
            _ => None,
        }
    }

    /// Opening and closing wall-clock times.
    pub fn bounds(&self) -> (NaiveTime, NaiveTime) {
        let (start, end) = match self {
            Period::Morning => (9, 12),
            Period::Afternoon => (14, 17),
            Period::Evening => (18, 21),
        };
        (hm(start), hm(end))
    }
}

fn hm(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Session availability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "stopped" => Some(SessionStatus::Stopped),
            _ => None,
        }
    }
}

/// Concrete time window of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// A provider's bookable block on one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicSession {
    pub session_id: i64,
    /// Owning provider
    pub provider_id: i64,
    pub date: NaiveDate,
    pub period: Period,
    /// Maximum number of live bookings
    pub capacity: i64,
    pub status: SessionStatus,
}

impl ClinicSession {
    pub fn window(&self) -> TimeWindow {
        let (start, end) = self.period.bounds();
        TimeWindow {
            start: self.date.and_time(start),
            end: self.date.and_time(end),
        }
    }

    /// Pure check; does not touch the stored status.
    pub fn is_past_window(&self, now: NaiveDateTime) -> bool {
        now >= self.window().end
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Bookable right now: active and not yet over.
    pub fn accepts_bookings(&self, now: NaiveDateTime) -> bool {
        self.is_active() && !self.is_past_window(now)
    }
}

/// Snapshot returned by `SessionStore::capacity_info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapacityInfo {
    pub session_id: i64,
    pub capacity: i64,
    /// Appointments whose current status is not `Cancelled`
    pub active_booked: i64,
    pub status: SessionStatus,
    pub window: TimeWindow,
}

impl CapacityInfo {
    pub fn remaining(&self) -> i64 {
        (self.capacity - self.active_booked).max(0)
    }

    pub fn is_full(&self) -> bool {
        self.active_booked >= self.capacity
    }
}
