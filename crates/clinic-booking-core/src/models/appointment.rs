//! Appointment models.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::status::Status;

/// A patient's place in one session's queue.
///
/// The row carries no status of its own; the current status always comes
/// from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub appt_id: i64,
    pub patient_id: i64,
    pub session_id: i64,
    /// 1-based queue position assigned at booking time
    pub slot_seq: i64,
    pub created_at: NaiveDateTime,
}

/// Appointment joined with its ledger-derived current status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentView {
    pub appointment: Appointment,
    pub status: Status,
}

impl AppointmentView {
    pub fn appt_id(&self) -> i64 {
        self.appointment.appt_id
    }

    pub fn slot_seq(&self) -> i64 {
        self.appointment.slot_seq
    }
}
