//! Appointment status and ledger event models.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Appointment lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Holds a slot in the session queue
    Booked,
    /// Patient has arrived
    CheckedIn,
    /// Visit finished
    Completed,
    /// Released by the patient
    Cancelled,
    /// Passed over in the queue or absent at settlement
    NoShow,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Booked,
        Status::CheckedIn,
        Status::Completed,
        Status::Cancelled,
        Status::NoShow,
    ];

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Booked => "booked",
            Status::CheckedIn => "checked_in",
            Status::Completed => "completed",
            Status::Cancelled => "cancelled",
            Status::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booked" => Some(Status::Booked),
            "checked_in" => Some(Status::CheckedIn),
            "completed" => Some(Status::Completed),
            "cancelled" => Some(Status::Cancelled),
            "no_show" => Some(Status::NoShow),
            _ => None,
        }
    }

    /// Resolved statuses no longer hold a place ahead of later slots.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled | Status::NoShow)
    }

    /// Whether the appointment still occupies session capacity.
    pub fn holds_capacity(&self) -> bool {
        !matches!(self, Status::Cancelled)
    }

    /// Legal lifecycle transitions.
    ///
    /// `Cancelled -> Booked` is only taken by re-booking into the same
    /// session; `Completed` is final.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;
        matches!(
            (self, next),
            (Booked, CheckedIn)
                | (Booked, Completed)
                | (Booked, Cancelled)
                | (Booked, NoShow)
                | (CheckedIn, Completed)
                | (CheckedIn, Cancelled)
                | (CheckedIn, NoShow)
                | (NoShow, CheckedIn)
                | (NoShow, Cancelled)
                | (Cancelled, Booked)
        )
    }

    /// Current status as a fold over the ledger, starting from `Booked`.
    pub fn fold<'a, I>(events: I) -> Status
    where
        I: IntoIterator<Item = &'a StatusEvent>,
    {
        events
            .into_iter()
            .fold(Status::Booked, |_, event| event.to_status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity performing a mutation, recorded on every ledger event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Provider(i64),
    Patient(i64),
}

impl Actor {
    pub fn kind(&self) -> &'static str {
        match self {
            Actor::Provider(_) => "provider",
            Actor::Patient(_) => "patient",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Actor::Provider(id) | Actor::Patient(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "provider" => Some(Actor::Provider(id)),
            "patient" => Some(Actor::Patient(id)),
            _ => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// One committed row of the status ledger (append-only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    /// Unique event ID
    pub event_id: String,
    /// Appointment this event belongs to
    pub appt_id: i64,
    /// Position in the appointment's history, starting at 1
    pub seq: i64,
    /// Status before the change (`None` for the very first booking)
    pub from_status: Option<Status>,
    /// Status after the change
    pub to_status: Status,
    /// Who made the change
    pub changed_by: Actor,
    /// When the change was recorded
    pub changed_at: NaiveDateTime,
    /// Hash of the previous event for this appointment (empty for the first)
    pub prev_hash: String,
    /// Hash over this event's content and `prev_hash`
    pub event_hash: String,
}

impl StatusEvent {
    /// Whether this event records a move without a status change.
    pub fn is_audit_only(&self) -> bool {
        self.from_status == Some(self.to_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in Status::ALL {
            assert_eq!(Status::parse(status.as_str()), Some(status));
        }
        assert_eq!(Status::parse("pending"), None);
    }

    #[test]
    fn test_terminal_set() {
        assert!(!Status::Booked.is_terminal());
        assert!(!Status::CheckedIn.is_terminal());
        assert!(Status::Completed.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(Status::NoShow.is_terminal());
    }

    #[test]
    fn test_only_cancelled_frees_capacity() {
        for status in Status::ALL {
            assert_eq!(status.holds_capacity(), status != Status::Cancelled);
        }
    }

    #[test]
    fn test_completed_is_final() {
        for next in Status::ALL {
            assert!(!Status::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn test_cancelled_only_rebooks() {
        assert!(Status::Cancelled.can_transition_to(Status::Booked));
        assert!(!Status::Cancelled.can_transition_to(Status::CheckedIn));
        assert!(!Status::Cancelled.can_transition_to(Status::NoShow));
    }

    #[test]
    fn test_late_arrival_after_no_show() {
        assert!(Status::NoShow.can_transition_to(Status::CheckedIn));
    }

    #[test]
    fn test_fold_defaults_to_booked() {
        assert_eq!(Status::fold(std::iter::empty()), Status::Booked);
    }

    #[test]
    fn test_actor_parts() {
        let actor = Actor::Provider(7);
        assert_eq!(Actor::from_parts(actor.kind(), actor.id()), Some(actor));
        assert_eq!(Actor::from_parts("robot", 1), None);
        assert_eq!(Actor::Patient(3).to_string(), "patient:3");
    }
}
