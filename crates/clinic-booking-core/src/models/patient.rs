//! Patient standing models (no-show history and booking bans).

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::PenaltyPolicy;

/// Penalty-relevant view of a patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientStanding {
    pub patient_id: i64,
    /// Count of recorded no-show occurrences (never decreases)
    pub no_show_count: i64,
    /// Last day of the current ban, inclusive
    pub banned_until: Option<NaiveDate>,
    /// No-show count for which the most recent ban was issued
    pub ban_issued_at_count: i64,
}

/// Why an appointment counted against a patient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PenaltyReason {
    NoShow,
    Cancellation,
}

impl PenaltyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PenaltyReason::NoShow => "no_show",
            PenaltyReason::Cancellation => "cancellation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_show" => Some(PenaltyReason::NoShow),
            "cancellation" => Some(PenaltyReason::Cancellation),
            _ => None,
        }
    }
}

/// One penalised appointment. At most one record exists per appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoShowRecord {
    pub patient_id: i64,
    pub appt_id: i64,
    pub reason: PenaltyReason,
    pub recorded_at: NaiveDateTime,
}

/// Outcome of evaluating a standing against today's date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanState {
    /// Below threshold, or a previous ban has been served
    Clear,
    /// Banned through the given date
    Active(NaiveDate),
    /// Threshold reached but no ban recorded yet; materialise through the date
    Due(NaiveDate),
    /// The recorded ban ended before today and should be cleared
    Lapsed(NaiveDate),
}

impl BanState {
    pub fn is_banned(&self) -> bool {
        matches!(self, BanState::Active(_) | BanState::Due(_))
    }

    pub fn banned_until(&self) -> Option<NaiveDate> {
        match self {
            BanState::Active(until) | BanState::Due(until) => Some(*until),
            _ => None,
        }
    }
}

impl PatientStanding {
    /// Standing of a patient with no history.
    pub fn new(patient_id: i64) -> Self {
        Self {
            patient_id,
            no_show_count: 0,
            banned_until: None,
            ban_issued_at_count: 0,
        }
    }

    /// Highest multiple of the threshold reached so far (0 if none).
    pub fn ban_milestone(&self, policy: &PenaltyPolicy) -> i64 {
        if policy.threshold <= 0 {
            return 0;
        }
        (self.no_show_count / policy.threshold) * policy.threshold
    }

    /// Pure evaluation; writes are left to the tracker.
    pub fn ban_state(&self, today: NaiveDate, policy: &PenaltyPolicy) -> BanState {
        if self.no_show_count < policy.threshold {
            return BanState::Clear;
        }
        match self.banned_until {
            Some(until) if today > until => BanState::Lapsed(until),
            Some(until) => BanState::Active(until),
            None if self.ban_issued_at_count < self.ban_milestone(policy) => {
                BanState::Due(policy.ban_end(today))
            }
            None => BanState::Clear,
        }
    }
}

impl PenaltyPolicy {
    /// Last banned day for a ban starting today.
    pub fn ban_end(&self, today: NaiveDate) -> NaiveDate {
        today + Duration::days(self.ban_days)
    }
}
